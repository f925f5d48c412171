// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Orchestration of a single run.
//!
//! A run is a pure function from (existing snapshot, increment) to (new
//! snapshot, top-K artifact). [`run`] performs the computation through a
//! backend, [`run_job`] adds reading the inputs and writing the outputs as
//! described by a [`Config`].
//!
//! A run either produces all of its outputs or fails. The marker of the
//! previous run is removed before anything else is written. Both tables are
//! then staged in full, renamed into place, and only after that is the new
//! completion marker written. So when the marker exists, the other two files
//! are complete and belong to the same run.

use std::collections::HashSet;
use std::fs;

use log::{info, warn};

use crate::aggregate::AggregateRow;
use crate::backend::{AggregationBackend, BackendKind, MemoryBackend, SqliteBackend};
use crate::config::Config;
use crate::error::Result;
use crate::merge;
use crate::normalize::{MemoryMetadataCache, MetadataCache, RawListen, ReleaseMetadata};
use crate::prim::{Cutoff, Mode, UserId};
use crate::serialization::{self, ArtifactPaths, CompletionMarker};
use crate::topk::{Selection, TopKEntry};

/// Parameters of a run that affect its output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JobSpec {
    pub k: Cutoff,
    pub mode: Mode,
}

/// The tables a run reads.
pub struct RunInputs<'a> {
    /// The raw listens of the increment.
    pub listens: &'a [RawListen],
    pub cache: &'a dyn MetadataCache,
    /// The snapshot written by the previous run, empty for the first run.
    pub existing: &'a [AggregateRow],
}

/// Row counts of a run, for operators.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    pub listens_read: usize,
    /// Listens without a release name, excluded from the statistics.
    pub listens_dropped: usize,
    pub touched_users: usize,
    pub merged_rows: usize,
    pub users_emitted: usize,
}

pub struct RunOutput {
    /// The full merged table, the existing snapshot of the next run.
    pub snapshot: Vec<AggregateRow>,
    pub top_k: Vec<TopKEntry>,
    pub stats: RunStats,
}

/// Merge the increment into the existing snapshot and select top-K lists.
pub fn run(
    backend: &mut dyn AggregationBackend,
    job: &JobSpec,
    inputs: &RunInputs,
) -> Result<RunOutput> {
    let mut stats = RunStats::default();

    let normalized = backend.normalize(inputs.listens, inputs.cache)?;
    stats.listens_read = normalized.read;
    stats.listens_dropped = normalized.dropped;
    info!(
        "Normalized {} listens into {} rows.",
        normalized.read,
        normalized.rows.len(),
    );
    if normalized.dropped > 0 {
        warn!(
            "Dropped {} listens without release name.",
            normalized.dropped,
        );
    }

    let touched: HashSet<UserId> = normalized.rows.iter().map(|r| r.user_id).collect();
    stats.touched_users = touched.len();

    let increment = backend.partial_aggregate(&normalized.rows)?;
    info!(
        "Aggregated increment into {} rows for {} users.",
        increment.len(),
        touched.len(),
    );

    let merged = backend.merge_outer_join(inputs.existing, &increment)?;
    stats.merged_rows = merged.len();
    info!(
        "Merged {} existing and {} new rows into {} rows.",
        inputs.existing.len(),
        increment.len(),
        merged.len(),
    );

    let selection = match job.mode {
        Mode::Full => Selection::Full,
        Mode::Incremental => Selection::Incremental(&touched),
    };
    let top_k = backend.rank_and_truncate(&merged, selection, job.k)?;
    stats.users_emitted = top_k.len();
    info!(
        "Selected top {} for {} users (incremental = {}).",
        job.k,
        top_k.len(),
        job.mode,
    );

    let output = RunOutput {
        snapshot: merge::collapse_to_snapshot(merged),
        top_k: top_k,
        stats: stats,
    };

    Ok(output)
}

fn open_backend(config: &Config) -> Result<Box<dyn AggregationBackend>> {
    let backend: Box<dyn AggregationBackend> = match config.backend {
        BackendKind::Memory => Box::new(MemoryBackend),
        BackendKind::Sqlite => match config.sqlite_path.as_ref() {
            Some(path) => Box::new(SqliteBackend::open(path)?),
            None => Box::new(SqliteBackend::in_memory()?),
        },
    };
    Ok(backend)
}

/// Execute a run as configured: read the inputs, run, write the outputs.
pub fn run_job(config: &Config) -> Result<RunStats> {
    let listens: Vec<RawListen> = serialization::read_jsonl_file(&config.listens_path)?;
    info!("Read {} listens from {}.", listens.len(), config.listens_path.to_string_lossy());

    let cache_rows: Vec<ReleaseMetadata> = serialization::read_jsonl_file(&config.metadata_cache_path)?;
    let cache = MemoryMetadataCache::from_rows(cache_rows);
    info!("Loaded metadata for {} releases.", cache.len());

    let existing: Vec<AggregateRow> = match config.existing_snapshot_path.as_ref() {
        Some(path) => serialization::read_jsonl_file(path)?,
        None => Vec::new(),
    };
    info!("Read {} rows from the existing snapshot.", existing.len());

    let mut backend = open_backend(config)?;
    info!("Computing with the {} backend.", backend.name());

    let job = JobSpec {
        k: config.k,
        mode: config.mode,
    };
    let inputs = RunInputs {
        listens: &listens,
        cache: &cache,
        existing: &existing,
    };
    let output = run(&mut *backend, &job, &inputs)?;

    fs::create_dir_all(&config.output_dir)?;
    let paths = ArtifactPaths::new(&config.output_dir, &config.entity, &config.stats_range);
    serialization::remove_if_exists(&paths.marker)?;
    let top_k = serialization::stage_jsonl_file(&paths.top_k, &output.top_k)?;
    let snapshot = serialization::stage_jsonl_file(&paths.snapshot, &output.snapshot)?;
    snapshot.commit()?;
    top_k.commit()?;
    let marker = CompletionMarker::new(
        &config.entity,
        &config.stats_range,
        output.stats.listens_dropped,
        chrono::Utc::now(),
    );
    marker.write(&paths.marker)?;
    info!("Wrote outputs to {}.", config.output_dir.to_string_lossy());

    Ok(output.stats)
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::{run, run_job, JobSpec, RunInputs};
    use crate::aggregate::AggregateRow;
    use crate::backend::{AggregationBackend, MemoryBackend, SqliteBackend};
    use crate::config::Config;
    use crate::identity::EntityIdentity;
    use crate::normalize::{MemoryMetadataCache, RawListen, ReleaseMetadata};
    use crate::prim::{Cutoff, Mode, UserId};
    use crate::serialization;
    use crate::topk::TopKEntry;

    fn listen(user: i64, name: &str) -> RawListen {
        RawListen {
            user_id: UserId(user),
            release_name: Some(name.to_string()),
            artist_name: Some("Artist".to_string()),
            ..RawListen::default()
        }
    }

    fn existing(user: i64, name: &str, count: u64) -> AggregateRow {
        AggregateRow {
            user_id: UserId(user),
            identity: EntityIdentity::named(name, "Artist"),
            listen_count: count,
        }
    }

    fn job(k: usize, mode: Mode) -> JobSpec {
        JobSpec {
            k: Cutoff::new(k).unwrap(),
            mode: mode,
        }
    }

    fn top(entry: &TopKEntry) -> Vec<(&str, u64)> {
        entry.releases.iter().map(|r| (&r.release_name[..], r.listen_count)).collect()
    }

    fn backends() -> Vec<Box<dyn AggregationBackend>> {
        vec![
            Box::new(MemoryBackend),
            Box::new(SqliteBackend::in_memory().unwrap()),
        ]
    }

    #[test]
    fn run_emits_new_top_release() {
        for mut backend in backends() {
            let cache = MemoryMetadataCache::new();
            let listens = vec![listen(1, "A"), listen(1, "A")];
            let mut listens_b: Vec<RawListen> = (0..10).map(|_| listen(1, "B")).collect();
            let mut all = listens.clone();
            all.append(&mut listens_b);
            let history = vec![existing(1, "A", 5)];
            let inputs = RunInputs {
                listens: &all,
                cache: &cache,
                existing: &history,
            };
            let output = run(&mut *backend, &job(1, Mode::Incremental), &inputs).unwrap();
            assert_eq!(output.top_k.len(), 1);
            assert_eq!(top(&output.top_k[0]), vec![("B", 10)]);
            assert_eq!(output.top_k[0].count, 2);
            assert_eq!(output.snapshot.len(), 2);
            assert_eq!(output.snapshot[0].listen_count, 7);
            assert_eq!(output.snapshot[1].listen_count, 10);
        }
    }

    #[test]
    fn run_counts_dropped_listens() {
        for mut backend in backends() {
            let cache = MemoryMetadataCache::new();
            let mut nameless = listen(2, "");
            nameless.release_name = None;
            let listens = vec![listen(1, "A"), listen(2, ""), nameless];
            let inputs = RunInputs {
                listens: &listens,
                cache: &cache,
                existing: &[],
            };
            let output = run(&mut *backend, &job(10, Mode::Incremental), &inputs).unwrap();
            assert_eq!(output.stats.listens_read, 3);
            assert_eq!(output.stats.listens_dropped, 2);
            assert_eq!(output.stats.touched_users, 1);
            assert_eq!(output.stats.users_emitted, 1);
        }
    }

    #[test]
    fn unchanged_top_k_is_suppressed_but_snapshot_is_complete() {
        for mut backend in backends() {
            let cache = MemoryMetadataCache::new();
            // User 1 listens to something far outside their top 1.
            let listens = vec![listen(1, "C")];
            let history = vec![existing(1, "A", 50), existing(2, "A", 3)];
            let inputs = RunInputs {
                listens: &listens,
                cache: &cache,
                existing: &history,
            };
            let output = run(&mut *backend, &job(1, Mode::Incremental), &inputs).unwrap();
            assert!(output.top_k.is_empty());
            assert_eq!(output.snapshot.len(), 3);

            let output = run(&mut *backend, &job(1, Mode::Full), &inputs).unwrap();
            assert_eq!(output.top_k.len(), 2);
        }
    }

    #[test]
    fn second_run_starts_from_first_snapshot() {
        for mut backend in backends() {
            let cache = MemoryMetadataCache::new();
            let first = vec![listen(1, "Album"), listen(1, "B")];
            let inputs = RunInputs {
                listens: &first,
                cache: &cache,
                existing: &[],
            };
            let snapshot = run(&mut *backend, &job(5, Mode::Incremental), &inputs).unwrap().snapshot;

            let second = vec![listen(1, "album")];
            let inputs = RunInputs {
                listens: &second,
                cache: &cache,
                existing: &snapshot,
            };
            let output = run(&mut *backend, &job(5, Mode::Incremental), &inputs).unwrap();
            assert_eq!(output.snapshot.len(), 2);
            // The merged row takes the name from the increment.
            assert_eq!(top(&output.top_k[0]), vec![("B", 1), ("album", 2)]);
        }
    }

    #[test]
    fn run_job_writes_artifacts_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let listens_path = dir.path().join("listens.jsonl");
        let cache_path = dir.path().join("cache.jsonl");
        let out_dir = dir.path().join("out");

        let listens = vec![
            RawListen {
                user_id: UserId(1),
                release_mbid: Some("m1".to_string()),
                ..RawListen::default()
            },
            listen(1, "Inline"),
            listen(2, ""),
        ];
        let cache = vec![ReleaseMetadata {
            release_mbid: "m1".to_string(),
            release_name: Some("Cached".to_string()),
            album_artist_name: Some("Cached Artist".to_string()),
            caa_id: Some(9),
            ..ReleaseMetadata::default()
        }];
        serialization::write_jsonl_file(&listens_path, &listens).unwrap();
        serialization::write_jsonl_file(&cache_path, &cache).unwrap();

        let config_lines = vec![
            format!("listens_path = {}", listens_path.to_string_lossy()),
            format!("metadata_cache_path = {}", cache_path.to_string_lossy()),
            format!("output_dir = {}", out_dir.to_string_lossy()),
            "k = 10".to_string(),
            "stats_range = week".to_string(),
        ];
        let config = Config::parse(&config_lines).unwrap();
        let stats = run_job(&config).unwrap();
        assert_eq!(stats.listens_dropped, 1);
        assert_eq!(stats.users_emitted, 1);

        let top_k: Vec<serde_json::Value> =
            serialization::read_jsonl_file(&out_dir.join("releases_week.top.jsonl")).unwrap();
        assert_eq!(top_k.len(), 1);
        assert_eq!(top_k[0]["user_id"], 1);
        assert_eq!(top_k[0]["count"], 2);
        assert_eq!(top_k[0]["data"].as_array().unwrap().len(), 2);

        let snapshot: Vec<AggregateRow> =
            serialization::read_jsonl_file(&out_dir.join("releases_week.snapshot.jsonl")).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].identity.release_name, "Cached");
        assert_eq!(snapshot[0].identity.caa_id, Some(9));

        let marker = fs::read_to_string(out_dir.join("releases_week.done.json")).unwrap();
        let marker: serde_json::Value = serde_json::from_str(&marker).unwrap();
        assert_eq!(marker["type"], "stats_job_finished");
        assert_eq!(marker["stats_range"], "week");
        assert_eq!(marker["listens_dropped"], 1);
    }

    #[test]
    fn failed_run_leaves_no_marker_and_keeps_previous_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let listens_path = dir.path().join("listens.jsonl");
        let cache_path = dir.path().join("cache.jsonl");
        let out_dir = dir.path().join("out");
        serialization::write_jsonl_file::<ReleaseMetadata>(&cache_path, &[]).unwrap();

        let config_lines = vec![
            format!("listens_path = {}", listens_path.to_string_lossy()),
            format!("metadata_cache_path = {}", cache_path.to_string_lossy()),
            format!("output_dir = {}", out_dir.to_string_lossy()),
        ];
        let config = Config::parse(&config_lines).unwrap();

        serialization::write_jsonl_file(&listens_path, &[listen(1, "First")]).unwrap();
        run_job(&config).unwrap();
        let top_k_path = out_dir.join("releases_all_time.top.jsonl");
        let marker_path = out_dir.join("releases_all_time.done.json");
        let top_k_before = fs::read_to_string(&top_k_path).unwrap();
        assert!(marker_path.exists());

        // A non-empty directory in place of the snapshot makes its rename fail.
        let snapshot_path = out_dir.join("releases_all_time.snapshot.jsonl");
        fs::remove_file(&snapshot_path).unwrap();
        fs::create_dir(&snapshot_path).unwrap();
        fs::write(snapshot_path.join("occupied"), "").unwrap();

        serialization::write_jsonl_file(&listens_path, &[listen(1, "Second")]).unwrap();
        assert!(run_job(&config).is_err());

        assert!(!marker_path.exists());
        assert_eq!(fs::read_to_string(&top_k_path).unwrap(), top_k_before);
        assert!(!out_dir.join("releases_all_time.top.jsonl.tmp").exists());
        assert!(!out_dir.join("releases_all_time.snapshot.jsonl.tmp").exists());
    }
}
