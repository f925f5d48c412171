// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

use crate::aggregate::{self, AggregateRow};
use crate::backend::AggregationBackend;
use crate::error::Result;
use crate::merge::{self, MergedRow};
use crate::normalize::NormalizedListen;
use crate::prim::Cutoff;
use crate::topk::{self, Selection, TopKEntry};

/// Executes every operation with in-memory hash maps.
pub struct MemoryBackend;

impl AggregationBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn partial_aggregate(&mut self, rows: &[NormalizedListen]) -> Result<Vec<AggregateRow>> {
        Ok(aggregate::partial_aggregate(rows))
    }

    fn merge_outer_join(
        &mut self,
        existing: &[AggregateRow],
        new: &[AggregateRow],
    ) -> Result<Vec<MergedRow>> {
        merge::merge_outer_join(existing, new)
    }

    fn rank_and_truncate(
        &mut self,
        merged: &[MergedRow],
        selection: Selection,
        k: Cutoff,
    ) -> Result<Vec<TopKEntry>> {
        Ok(topk::rank_and_truncate(merged, selection, k))
    }
}
