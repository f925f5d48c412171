// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Reading and writing tables as json lines.
//!
//! Every table is a file with one json object per line. Outputs are first
//! written to a temporary file next to the destination, synced, and then
//! renamed into place, so a reader either sees the previous file or the
//! complete new one.

use std::fs;
use std::io;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Read a table, one row per line. Blank lines are ignored.
///
/// A line that is not valid json, or that lacks a required field, fails with
/// a schema error that names the source and the 1-based line number.
pub fn read_jsonl<T, R>(source_name: &str, reader: R) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue
        }
        match serde_json::from_str(&line) {
            Ok(row) => rows.push(row),
            Err(err) => return Err(Error::Schema {
                source_name: source_name.to_string(),
                line: i + 1,
                message: err.to_string(),
            }),
        }
    }
    Ok(rows)
}

pub fn read_jsonl_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let f = fs::File::open(path)?;
    let source_name = path.to_string_lossy();
    read_jsonl(&source_name, io::BufReader::new(f))
}

/// Write a table, one row per line.
pub fn write_jsonl<T, W>(rows: &[T], mut w: W) -> Result<()>
where
    T: Serialize,
    W: Write,
{
    for row in rows {
        serde_json::to_writer(&mut w, row)?;
        w.write_all(b"\n")?;
    }
    Ok(())
}

/// A fully written and synced temporary file, not yet renamed into place.
///
/// Dropping it without calling [`StagedFile::commit`] removes the temporary
/// file, and leaves any existing file at the destination untouched.
pub struct StagedFile {
    tmp_path: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Rename the temporary file over the destination.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp_path, &self.path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Write the contents of `path` to a temporary file next to it, and sync it.
pub fn stage_file<F>(path: &Path, write: F) -> Result<StagedFile>
where
    F: FnOnce(&mut io::BufWriter<&fs::File>) -> Result<()>,
{
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let staged = StagedFile {
        tmp_path: PathBuf::from(tmp_name),
        path: path.to_path_buf(),
        committed: false,
    };

    let f = fs::File::create(&staged.tmp_path)?;
    {
        let mut w = io::BufWriter::new(&f);
        write(&mut w)?;
        w.flush()?;
    }
    f.sync_all()?;

    Ok(staged)
}

/// Write the file at `path` through a temporary file, then rename it into place.
///
/// When `write` fails, the temporary file is removed and any existing file at
/// `path` is left untouched.
pub fn write_file_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut io::BufWriter<&fs::File>) -> Result<()>,
{
    stage_file(path, write)?.commit()
}

/// Stage a table for `path` as json lines.
pub fn stage_jsonl_file<T: Serialize>(path: &Path, rows: &[T]) -> Result<StagedFile> {
    stage_file(path, |w| write_jsonl(rows, w))
}

/// Remove the file at `path`, if there is one.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        result => Ok(result?),
    }
}

/// Write a table to `path` as json lines, atomically.
pub fn write_jsonl_file<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    stage_jsonl_file(path, rows)?.commit()
}

/// Locations of the outputs of a run for one (entity, stats range).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactPaths {
    pub top_k: PathBuf,
    pub snapshot: PathBuf,
    pub marker: PathBuf,
}

impl ArtifactPaths {
    pub fn new(output_dir: &Path, entity: &str, stats_range: &str) -> ArtifactPaths {
        let prefix = format!("{}_{}", entity, stats_range);
        ArtifactPaths {
            top_k: output_dir.join(format!("{}.top.jsonl", prefix)),
            snapshot: output_dir.join(format!("{}.snapshot.jsonl", prefix)),
            marker: output_dir.join(format!("{}.done.json", prefix)),
        }
    }
}

/// Signals to consumers that the artifacts of a run are complete.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CompletionMarker {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub entity: String,
    pub stats_range: String,
    /// RFC 3339 timestamp in UTC.
    pub finished_at: String,
    /// Listens dropped because they had no release name.
    pub listens_dropped: usize,
}

impl CompletionMarker {
    pub fn new(
        entity: &str,
        stats_range: &str,
        listens_dropped: usize,
        finished_at: DateTime<Utc>,
    ) -> CompletionMarker {
        CompletionMarker {
            kind: "stats_job_finished",
            entity: entity.to_string(),
            stats_range: stats_range.to_string(),
            finished_at: finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            listens_dropped: listens_dropped,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_file_atomic(path, |w| {
            serde_json::to_writer(&mut *w, self)?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use chrono::{TimeZone, Utc};

    use super::{
        read_jsonl, read_jsonl_file, remove_if_exists, stage_jsonl_file, write_file_atomic,
        write_jsonl_file, ArtifactPaths, CompletionMarker,
    };
    use crate::aggregate::AggregateRow;
    use crate::error::Error;
    use crate::identity::EntityIdentity;
    use crate::normalize::RawListen;
    use crate::prim::UserId;

    #[test]
    fn read_jsonl_skips_blank_lines_and_ignores_extra_fields() {
        let input = "{\"user_id\": 1, \"release_name\": \"A\", \"listened_at\": 12}\n\n\
                     {\"user_id\": 2, \"release_mbid\": \"m\"}\n";
        let rows: Vec<RawListen> = read_jsonl("listens", input.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].release_name.as_deref(), Some("A"));
        assert_eq!(rows[1].user_id, UserId(2));
        assert_eq!(rows[1].release_name, None);
    }

    #[test]
    fn read_jsonl_reports_schema_errors_with_line() {
        let input = "{\"user_id\": 1}\n{\"release_name\": \"A\"}\n";
        match read_jsonl::<RawListen, _>("listens", input.as_bytes()) {
            Err(Error::Schema { source_name, line, .. }) => {
                assert_eq!(source_name, "listens");
                assert_eq!(line, 2);
            }
            other => panic!("Expected schema error, got {:?}", other),
        }

        let input = "{\"user_id\": \"one\"}\n";
        match read_jsonl::<RawListen, _>("listens", input.as_bytes()) {
            Err(Error::Schema { line: 1, .. }) => {}
            other => panic!("Expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn snapshot_survives_a_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        let mut identity = EntityIdentity::named("1989", "Taylor Swift");
        identity.caa_id = Some(42);
        let rows = vec![AggregateRow {
            user_id: UserId(7),
            identity: identity,
            listen_count: 3,
        }];
        write_jsonl_file(&path, &rows).unwrap();
        let read: Vec<AggregateRow> = read_jsonl_file(&path).unwrap();
        assert_eq!(read, rows);
        assert_eq!(read[0].identity.release_name, "1989");
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        fs::write(&path, "previous\n").unwrap();

        let result = write_file_atomic(&path, |_| Err(Error::IncompleteConfig("boom")));
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous\n");
        assert!(!dir.path().join("snapshot.jsonl.tmp").exists());
    }

    #[test]
    fn staged_file_only_replaces_destination_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top.jsonl");
        let tmp_path = dir.path().join("top.jsonl.tmp");
        fs::write(&path, "previous\n").unwrap();

        let staged = stage_jsonl_file(&path, &[1, 2]).unwrap();
        assert!(tmp_path.exists());
        drop(staged);
        assert!(!tmp_path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous\n");

        stage_jsonl_file(&path, &[1, 2]).unwrap().commit().unwrap();
        assert!(!tmp_path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n2\n");
    }

    #[test]
    fn remove_if_exists_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.json");
        remove_if_exists(&path).unwrap();
        fs::write(&path, "{}\n").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn artifact_paths_include_entity_and_range() {
        let paths = ArtifactPaths::new(Path::new("/out"), "releases", "week");
        assert_eq!(paths.top_k, Path::new("/out/releases_week.top.jsonl"));
        assert_eq!(paths.snapshot, Path::new("/out/releases_week.snapshot.jsonl"));
        assert_eq!(paths.marker, Path::new("/out/releases_week.done.json"));
    }

    #[test]
    fn completion_marker_has_expected_shape() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let marker = CompletionMarker::new("releases", "all_time", 4, at);
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["type"], "stats_job_finished");
        assert_eq!(json["entity"], "releases");
        assert_eq!(json["stats_range"], "all_time");
        assert_eq!(json["finished_at"], "2026-03-01T12:30:00Z");
        assert_eq!(json["listens_dropped"], 4);
    }
}
