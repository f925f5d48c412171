// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Per-user top-K selection, and deciding which users to emit.
//!
//! ## Ranking
//!
//! Within a user, releases are ranked by listen count, highest first. Ties
//! are broken by the order of the rows in the merged table, not by giving
//! tied rows the same rank, so a user always gets exactly `min(k, n)` rows.
//! The merged table order is deterministic (see [`crate::merge`]), so the
//! ranking is reproducible.
//!
//! ## Output order
//!
//! The releases of an entry are in *ascending* order of listen count: the
//! list is exactly the reverse of the ranking, so reversing it gives rank 1
//! first. Consumers depend on this order, it is part of the output format.
//!
//! ## Change detection
//!
//! In incremental mode, only users who have listens in the increment are
//! considered, and of those only users where at least one of the rows that
//! made the cut changed are emitted. A change that stays outside of the top-K
//! (say rank 50 gets a listen when k is 10) does not cause the user to be
//! emitted, even though the total count may have changed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::identity::CreditedArtist;
use crate::merge::MergedRow;
use crate::prim::{Cutoff, ListenCount, UserId};

/// Which users to rank, and whether to gate their output on changes.
#[derive(Copy, Clone, Debug)]
pub enum Selection<'a> {
    /// Rank every user by final count and emit all of them.
    Full,
    /// Rank only the touched users, emit those whose top-K changed.
    Incremental(&'a HashSet<UserId>),
}

/// One release in a user's top-K list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RankedRelease {
    pub listen_count: ListenCount,
    pub release_name: String,
    pub release_mbid: Option<String>,
    pub artist_name: String,
    /// The artist credit mbids, an empty list when unknown.
    pub artist_mbids: Vec<String>,
    pub artists: Option<Vec<CreditedArtist>>,
    pub caa_id: Option<i64>,
    pub caa_release_mbid: Option<String>,
}

/// The top-K releases of one user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopKEntry {
    pub user_id: UserId,
    /// The top releases, in ascending order of listen count.
    #[serde(rename = "data")]
    pub releases: Vec<RankedRelease>,
    /// Number of distinct releases the user listened to, not just the top-K.
    pub count: usize,
}

impl RankedRelease {
    pub fn from_merged(row: &MergedRow) -> RankedRelease {
        let id = &row.identity;
        RankedRelease {
            listen_count: row.new_listen_count,
            release_name: id.release_name.clone(),
            release_mbid: id.release_mbid.clone(),
            artist_name: id.artist_name.clone(),
            artist_mbids: id.artist_credit_mbids.clone().unwrap_or_default(),
            artists: id.artists.clone(),
            caa_id: id.caa_id,
            caa_release_mbid: id.caa_release_mbid.clone(),
        }
    }
}

/// Return the indices of the top `k` rows, best first.
///
/// Rows are better when they have a higher count, and among equal counts,
/// when they come first. This keeps a min-heap of at most `k` elements, so
/// users with a long tail of releases do not need a full sort.
fn top_k_indices(rows: &[&MergedRow], k: usize) -> Vec<usize> {
    // The key orders better rows greater; the outer `Reverse` makes the heap
    // a min-heap, so the worst row we kept so far is at the top.
    let mut heap: BinaryHeap<Reverse<(ListenCount, Reverse<usize>)>> = BinaryHeap::new();

    for (i, row) in rows.iter().enumerate() {
        let key = (row.new_listen_count, Reverse(i));

        if heap.len() < k {
            heap.push(Reverse(key));
            continue;
        }

        let should_insert = match heap.peek() {
            None => true,
            Some(Reverse(worst)) => key > *worst,
        };
        if should_insert {
            heap.pop();
            heap.push(Reverse(key));
        }
    }

    // Sorting ascending on `Reverse` puts the best row first.
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse((_count, Reverse(i)))| i)
        .collect()
}

/// Rank the releases of every selected user and keep the top `k`.
///
/// Users are emitted in the order in which they first occur in `merged`.
pub fn rank_and_truncate(merged: &[MergedRow], selection: Selection, k: Cutoff) -> Vec<TopKEntry> {
    let mut user_index: HashMap<UserId, usize> = HashMap::new();
    let mut users: Vec<(UserId, Vec<&MergedRow>)> = Vec::new();

    for row in merged {
        if let Selection::Incremental(touched) = selection {
            if !touched.contains(&row.user_id) {
                continue
            }
        }
        let i = *user_index.entry(row.user_id).or_insert_with(|| {
            users.push((row.user_id, Vec::new()));
            users.len() - 1
        });
        users[i].1.push(row);
    }

    let mut result = Vec::new();

    for (user_id, rows) in users {
        let top = top_k_indices(&rows, k.get());

        if let Selection::Incremental(..) = selection {
            if !top.iter().any(|&i| rows[i].is_changed()) {
                continue
            }
        }

        let releases = top
            .iter()
            .rev()
            .map(|&i| RankedRelease::from_merged(rows[i]))
            .collect();

        result.push(TopKEntry {
            user_id: user_id,
            releases: releases,
            count: rows.len(),
        });
    }

    result
}
