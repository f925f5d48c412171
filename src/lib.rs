// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Per-user top-K release statistics, maintained incrementally.
//!
//! Rather than counting the entire listen history on every run, a run counts
//! only the new listens, merges those counts into the snapshot of the previous
//! run, and re-ranks only the users that listened to something new. The
//! stages are:
//!
//! 1. [`normalize`]: resolve raw listens against the metadata cache.
//! 2. [`aggregate`]: count listens per (user, release) in the increment.
//! 3. [`merge`]: outer join the increment with the existing snapshot.
//! 4. [`topk`]: rank, truncate, and decide which lists to emit.
//!
//! The heavy operations go through a [`backend::AggregationBackend`], and
//! [`pipeline`] strings the stages together.

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod database_utils;
pub mod error;
pub mod identity;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod prim;
pub mod serialization;
pub mod topk;

pub use crate::aggregate::AggregateRow;
pub use crate::identity::{CreditedArtist, EntityIdentity};
pub use crate::merge::MergedRow;
pub use crate::prim::{Cutoff, ListenCount, Mode, UserId};
pub use crate::topk::{RankedRelease, Selection, TopKEntry};
