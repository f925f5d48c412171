#![no_main]

use std::collections::{HashMap, HashSet};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use playstats::aggregate::{partial_aggregate, AggregateRow};
use playstats::merge::merge_outer_join;
use playstats::normalize::NormalizedListen;
use playstats::topk::{rank_and_truncate, Selection};
use playstats::{Cutoff, EntityIdentity, UserId};

// Names that collide under case folding, so the fuzzer can find grouping bugs.
const NAMES: [&str; 6] = ["A", "a", "B", "b", "\u{c5}", "A\u{30a}"];

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    k: u8,
    // (user, name index, has mbid, count)
    existing: Vec<(u8, u8, bool, u8)>,
    // (user, name index, has mbid)
    increment: Vec<(u8, u8, bool)>,
}

fn identity(name: u8, has_mbid: bool) -> EntityIdentity {
    let mut identity = EntityIdentity::named(NAMES[name as usize % NAMES.len()], "Artist");
    if has_mbid {
        identity.release_mbid = Some("mbid".to_string());
    }
    identity
}

fuzz_target!(|input: FuzzInput| {
    let k = match Cutoff::new(input.k as usize % 8) {
        Some(k) => k,
        None => return,
    };

    // The existing snapshot must be unique per key, keep the first occurrence.
    let mut existing: Vec<AggregateRow> = Vec::new();
    for (user, name, has_mbid, count) in input.existing {
        let row = AggregateRow {
            user_id: UserId(user as i64 % 4),
            identity: identity(name, has_mbid),
            listen_count: count as u64,
        };
        if !existing.iter().any(|r| r.user_id == row.user_id && r.identity == row.identity) {
            existing.push(row);
        }
    }

    let listens: Vec<NormalizedListen> = input
        .increment
        .iter()
        .map(|&(user, name, has_mbid)| NormalizedListen {
            user_id: UserId(user as i64 % 4),
            identity: identity(name, has_mbid),
        })
        .collect();

    let new = partial_aggregate(&listens);
    assert_eq!(new.iter().map(|r| r.listen_count).sum::<u64>(), listens.len() as u64);

    let merged = merge_outer_join(&existing, &new).unwrap();

    // Count conservation.
    let total_old: u64 = existing.iter().map(|r| r.listen_count).sum();
    let total_new: u64 = merged.iter().map(|r| r.new_listen_count).sum();
    assert_eq!(total_new, total_old + listens.len() as u64);
    assert_eq!(merged.iter().map(|r| r.old_listen_count).sum::<u64>(), total_old);

    let mut distinct: HashMap<UserId, usize> = HashMap::new();
    for row in &merged {
        *distinct.entry(row.user_id).or_insert(0) += 1;
    }

    let full = rank_and_truncate(&merged, Selection::Full, k);
    assert_eq!(full.len(), distinct.len());
    for entry in &full {
        assert_eq!(entry.count, distinct[&entry.user_id]);
        assert_eq!(entry.releases.len(), entry.count.min(k.get()));
        for pair in entry.releases.windows(2) {
            assert!(pair[0].listen_count <= pair[1].listen_count);
        }
    }

    let touched: HashSet<UserId> = listens.iter().map(|r| r.user_id).collect();
    let incremental = rank_and_truncate(&merged, Selection::Incremental(&touched), k);
    for entry in &incremental {
        assert!(touched.contains(&entry.user_id));
        assert!(full.iter().any(|f| f == entry));
    }
});
