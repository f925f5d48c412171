// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Backends that execute the set-oriented operations of a run.
//!
//! The pipeline only orchestrates: every heavy operation (grouping, the outer
//! join, windowed ranking) goes through [`AggregationBackend`]. All backends
//! must produce identical output for identical input, including row order,
//! which is what makes the tie-breaking in the ranking reproducible.

use std::fmt;
use std::str::FromStr;

use crate::aggregate::AggregateRow;
use crate::error::Result;
use crate::merge::MergedRow;
use crate::normalize::{self, MetadataCache, Normalized, NormalizedListen, RawListen};
use crate::prim::Cutoff;
use crate::topk::{Selection, TopKEntry};

mod memory;
mod sql;

pub use self::memory::MemoryBackend;
pub use self::sql::SqliteBackend;

pub trait AggregationBackend {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Resolve raw listens against the metadata cache.
    ///
    /// This is a row-level projection with keyed lookups, so by default it
    /// is done in memory for every backend.
    fn normalize(&mut self, listens: &[RawListen], cache: &dyn MetadataCache) -> Result<Normalized> {
        Ok(normalize::normalize(listens, cache))
    }

    /// Count listens per (user, release), see [`crate::aggregate`].
    fn partial_aggregate(&mut self, rows: &[NormalizedListen]) -> Result<Vec<AggregateRow>>;

    /// Full outer join of two aggregates, see [`crate::merge`].
    fn merge_outer_join(
        &mut self,
        existing: &[AggregateRow],
        new: &[AggregateRow],
    ) -> Result<Vec<MergedRow>>;

    /// Per-user top-K selection, see [`crate::topk`].
    fn rank_and_truncate(
        &mut self,
        merged: &[MergedRow],
        selection: Selection,
        k: Cutoff,
    ) -> Result<Vec<TopKEntry>>;
}

/// Which backend a run should use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackendKind {
    Memory,
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<BackendKind, &'static str> {
        match s {
            "memory" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            _ => Err("Invalid backend, must be 'memory' or 'sqlite'."),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}
