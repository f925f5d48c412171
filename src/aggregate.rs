// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Counting listens per (user, release) within one increment.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::EntityIdentity;
use crate::normalize::NormalizedListen;
use crate::prim::{ListenCount, UserId};

/// The listen count of one user for one release.
///
/// Every aggregate table holds at most one row per (user, release), where
/// releases are compared with the `Eq` instance of [`EntityIdentity`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub user_id: UserId,
    #[serde(flatten)]
    pub identity: EntityIdentity,
    pub listen_count: ListenCount,
}

/// Group the listens by (user, release) and count them.
///
/// Names that differ only in case end up in the same group; the group takes
/// the name of the first listen in it. The output contains the groups in the
/// order in which they first occur in the input, so identical input produces
/// identical output.
pub fn partial_aggregate(rows: &[NormalizedListen]) -> Vec<AggregateRow> {
    let mut index: HashMap<(UserId, &EntityIdentity), usize> = HashMap::new();
    let mut result: Vec<AggregateRow> = Vec::new();

    for row in rows {
        debug_assert!(row.identity.is_eligible(), "Nameless listens must be dropped by now.");

        match index.entry((row.user_id, &row.identity)) {
            Entry::Occupied(entry) => {
                result[*entry.get()].listen_count += 1;
            }
            Entry::Vacant(entry) => {
                entry.insert(result.len());
                result.push(AggregateRow {
                    user_id: row.user_id,
                    identity: row.identity.clone(),
                    listen_count: 1,
                });
            }
        }
    }

    result
}

#[cfg(test)]
mod test {
    use super::partial_aggregate;
    use crate::identity::EntityIdentity;
    use crate::normalize::NormalizedListen;
    use crate::prim::UserId;

    fn listen(user: i64, name: &str) -> NormalizedListen {
        NormalizedListen {
            user_id: UserId(user),
            identity: EntityIdentity::named(name, "Artist"),
        }
    }

    #[test]
    fn partial_aggregate_counts_per_user_and_release() {
        let rows = vec![
            listen(1, "A"),
            listen(2, "A"),
            listen(1, "B"),
            listen(1, "A"),
        ];
        let result = partial_aggregate(&rows);
        let summary: Vec<(i64, &str, u64)> = result
            .iter()
            .map(|r| (r.user_id.0, &r.identity.release_name[..], r.listen_count))
            .collect();
        assert_eq!(summary, vec![(1, "A", 2), (2, "A", 1), (1, "B", 1)]);
    }

    #[test]
    fn partial_aggregate_folds_case_and_keeps_first_name() {
        let rows = vec![listen(1, "album"), listen(1, "Album"), listen(1, "ALBUM")];
        let result = partial_aggregate(&rows);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].identity.release_name, "album");
        assert_eq!(result[0].listen_count, 3);

        // Same input, same representative.
        assert_eq!(partial_aggregate(&rows), result);
    }

    #[test]
    fn partial_aggregate_does_not_merge_null_with_value() {
        let mut with_mbid = listen(1, "A");
        with_mbid.identity.release_mbid = Some("m".to_string());
        let rows = vec![listen(1, "A"), with_mbid.clone(), listen(1, "A"), with_mbid];
        let result = partial_aggregate(&rows);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].identity.release_mbid, None);
        assert_eq!(result[0].listen_count, 2);
        assert_eq!(result[1].identity.release_mbid.as_deref(), Some("m"));
        assert_eq!(result[1].listen_count, 2);
    }

    #[test]
    fn partial_aggregate_of_nothing_is_empty() {
        assert!(partial_aggregate(&[]).is_empty());
    }
}
