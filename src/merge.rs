// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Combining the previous snapshot with the counts of a new increment.
//!
//! This is where every listen gets accounted for exactly once: a row of the
//! snapshot that the increment does not touch keeps its count, a row that only
//! the increment has starts from zero, and a row that both have gets the sum.

use std::collections::HashMap;

use crate::aggregate::AggregateRow;
use crate::error::{Error, Result};
use crate::identity::EntityIdentity;
use crate::prim::{ListenCount, UserId};

/// A (user, release) row after the merge, with the count before and after.
///
/// `new_listen_count` is `old_listen_count` plus the count in the increment,
/// so `new_listen_count >= old_listen_count` always holds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MergedRow {
    pub user_id: UserId,
    pub identity: EntityIdentity,
    pub old_listen_count: ListenCount,
    pub new_listen_count: ListenCount,
}

impl MergedRow {
    /// Whether the increment contributed to this row.
    pub fn is_changed(&self) -> bool {
        self.new_listen_count != self.old_listen_count
    }
}

/// Build an index from key to position, failing if a key occurs twice.
fn index_unique(rows: &[AggregateRow]) -> Result<HashMap<(UserId, &EntityIdentity), usize>> {
    let mut index = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if index.insert((row.user_id, &row.identity), i).is_some() {
            return Err(Error::DuplicateKey {
                user_id: row.user_id,
                release_name: row.identity.release_name.clone(),
            })
        }
    }
    Ok(index)
}

/// Full outer join of `existing` and `new` on (user, release).
///
/// Descriptive fields are taken from the `new` side when a row is on both
/// sides. Since all identity fields except the release name must match
/// exactly for the rows to join, in practice this means the name in the most
/// recent increment wins over the capitalization in the snapshot.
///
/// The output has the rows of `existing` in their original order, followed
/// by the rows that occur only in `new`, in their original order.
pub fn merge_outer_join(existing: &[AggregateRow], new: &[AggregateRow]) -> Result<Vec<MergedRow>> {
    // We never look up in the existing index, but building it is what checks
    // that the snapshot is well-formed.
    index_unique(existing)?;
    let new_index = index_unique(new)?;

    let mut matched = vec![false; new.len()];
    let mut result = Vec::with_capacity(existing.len() + new.len());

    for row_e in existing {
        let merged = match new_index.get(&(row_e.user_id, &row_e.identity)) {
            Some(&i) => {
                matched[i] = true;
                let row_n = &new[i];
                MergedRow {
                    user_id: row_n.user_id,
                    identity: row_n.identity.clone(),
                    old_listen_count: row_e.listen_count,
                    new_listen_count: row_e.listen_count + row_n.listen_count,
                }
            }
            None => MergedRow {
                user_id: row_e.user_id,
                identity: row_e.identity.clone(),
                old_listen_count: row_e.listen_count,
                new_listen_count: row_e.listen_count,
            },
        };
        result.push(merged);
    }

    for (row_n, was_matched) in new.iter().zip(matched) {
        if !was_matched {
            result.push(MergedRow {
                user_id: row_n.user_id,
                identity: row_n.identity.clone(),
                old_listen_count: 0,
                new_listen_count: row_n.listen_count,
            });
        }
    }

    Ok(result)
}

/// Turn the merged table into the snapshot that the next run starts from.
///
/// This is the full merged table, not just the rows that made it into some
/// user's top-K.
pub fn collapse_to_snapshot(merged: Vec<MergedRow>) -> Vec<AggregateRow> {
    merged
        .into_iter()
        .map(|row| AggregateRow {
            user_id: row.user_id,
            identity: row.identity,
            listen_count: row.new_listen_count,
        })
        .collect()
}
