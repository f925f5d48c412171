// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

// Configuration module inspired by the one in Tako (github.com/ruuda/tako),
// which is copyright 2018 Arian van Putten, Ruud van Asseldonk, Tako Marks,
// and licensed under the Apache 2.0 License.

//! Configuration file parser.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use crate::prim::{Cutoff, Mode};

#[derive(Debug, Clone)]
pub struct Config {
    pub listens_path: PathBuf,
    pub metadata_cache_path: PathBuf,
    /// When not set, the run starts from an empty history.
    pub existing_snapshot_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub k: Cutoff,
    pub mode: Mode,
    /// Entity type tag, passed through to artifact names and the marker.
    pub entity: String,
    /// Stats range tag, passed through to artifact names and the marker.
    pub stats_range: String,
    pub backend: BackendKind,
    /// Database file for the SQLite backend, in-memory when not set.
    pub sqlite_path: Option<PathBuf>,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "  listens_path           = {}\n", self.listens_path.to_string_lossy())?;
        write!(f, "  metadata_cache_path    = {}\n", self.metadata_cache_path.to_string_lossy())?;
        match self.existing_snapshot_path.as_ref() {
            Some(path) => write!(f, "  existing_snapshot_path = {}\n", path.to_string_lossy())?,
            None => write!(f, "  existing_snapshot_path is not set\n")?,
        }
        write!(f, "  output_dir             = {}\n", self.output_dir.to_string_lossy())?;
        write!(f, "  k                      = {}\n", self.k)?;
        write!(f, "  incremental            = {}\n", self.mode)?;
        write!(f, "  entity                 = {}\n", self.entity)?;
        write!(f, "  stats_range            = {}\n", self.stats_range)?;
        write!(f, "  backend                = {}", self.backend)?;
        match self.sqlite_path.as_ref() {
            Some(path) => write!(f, "\n  sqlite_path            = {}", path.to_string_lossy())?,
            None => write!(f, "\n  sqlite_path            is not set")?,
        }

        Ok(())
    }
}

/// Tags end up in file names, so we restrict them to a safe alphabet.
fn is_valid_tag(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

impl Config {
    pub fn parse<I, S>(lines: I) -> Result<Config>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut listens_path = None;
        let mut metadata_cache_path = None;
        let mut existing_snapshot_path = None;
        let mut output_dir = None;
        let mut k = None;
        let mut mode = Mode::Incremental;
        let mut entity = String::from("releases");
        let mut stats_range = String::from("all_time");
        let mut backend = BackendKind::Memory;
        let mut sqlite_path = None;

        for (i, line_raw) in lines.into_iter().enumerate() {
            let lineno = i + 1;
            let line = line_raw.as_ref().trim();

            // Allow empty lines in the config file.
            if line.len() == 0 {
                continue
            }

            // Skip lines starting with '#' to allow comments.
            if line.starts_with("#") {
                continue
            }

            if let Some(n) = line.find('=') {
                let key = line[..n].trim();
                let value = line[n + 1..].trim();
                match key {
                    "listens_path" => listens_path = Some(PathBuf::from(value)),
                    "metadata_cache_path" => metadata_cache_path = Some(PathBuf::from(value)),
                    "existing_snapshot_path" => existing_snapshot_path = Some(PathBuf::from(value)),
                    "output_dir" => output_dir = Some(PathBuf::from(value)),
                    "k" => match Cutoff::from_str(value) {
                        Ok(cutoff) => k = Some(cutoff),
                        Err(msg) => return Err(Error::InvalidConfig(lineno, msg)),
                    }
                    "incremental" => match Mode::from_str(value) {
                        Ok(m) => mode = m,
                        Err(msg) => return Err(Error::InvalidConfig(lineno, msg)),
                    }
                    "entity" if is_valid_tag(value) => entity = String::from(value),
                    "stats_range" if is_valid_tag(value) => stats_range = String::from(value),
                    "entity" | "stats_range" => {
                        let msg = "Invalid tag, must be non-empty and consist of \
                            ASCII letters, digits, '_', or '-'.";
                        return Err(Error::InvalidConfig(lineno, msg))
                    }
                    "backend" => match BackendKind::from_str(value) {
                        Ok(b) => backend = b,
                        Err(msg) => return Err(Error::InvalidConfig(lineno, msg)),
                    }
                    "sqlite_path" => sqlite_path = Some(PathBuf::from(value)),
                    _ => {
                        let msg = "Unknown key. See the configuration docs for supported keys.";
                        return Err(Error::InvalidConfig(lineno, msg))
                    }
                }
            } else {
                let msg = "Line contains no '='. \
                    Expected key-value pair like 'k = 1000'.";
                return Err(Error::InvalidConfig(lineno, msg))
            }
        }

        let config = Config {
            listens_path: match listens_path {
                Some(p) => p,
                None => return Err(Error::IncompleteConfig(
                    "Listens path not set. Expected 'listens_path ='-line."
                )),
            },
            metadata_cache_path: match metadata_cache_path {
                Some(p) => p,
                None => return Err(Error::IncompleteConfig(
                    "Metadata cache path not set. Expected 'metadata_cache_path ='-line."
                )),
            },
            existing_snapshot_path: existing_snapshot_path,
            output_dir: match output_dir {
                Some(p) => p,
                None => return Err(Error::IncompleteConfig(
                    "Output directory not set. Expected 'output_dir ='-line."
                )),
            },
            k: match k {
                Some(cutoff) => cutoff,
                None => Cutoff::DEFAULT,
            },
            mode: mode,
            entity: entity,
            stats_range: stats_range,
            backend: backend,
            sqlite_path: sqlite_path,
        };

        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::Config;
    use crate::backend::BackendKind;
    use crate::error::Error;
    use crate::prim::Mode;

    #[test]
    pub fn config_can_be_parsed() {
        let config_lines = [
            "# This is a comment.",
            "listens_path = /var/lib/stats/listens.jsonl",
            "metadata_cache_path = /var/lib/stats/release_cache.jsonl",
            "",
            "existing_snapshot_path = /var/lib/stats/releases_all_time.snapshot.jsonl",
            "output_dir = /var/lib/stats",
            "k = 25",
            "incremental = false",
            "stats_range = this_year",
            "backend = sqlite",
            "sqlite_path = /tmp/scratch.sqlite3",
        ];
        let config = Config::parse(&config_lines).unwrap();
        assert_eq!(config.listens_path.as_path(), Path::new("/var/lib/stats/listens.jsonl"));
        assert_eq!(
            config.existing_snapshot_path.as_ref().map(|p| p.as_path()),
            Some(Path::new("/var/lib/stats/releases_all_time.snapshot.jsonl")),
        );
        assert_eq!(config.output_dir.as_path(), Path::new("/var/lib/stats"));
        assert_eq!(config.k.get(), 25);
        assert_eq!(config.mode, Mode::Full);
        assert_eq!(&config.entity[..], "releases");
        assert_eq!(&config.stats_range[..], "this_year");
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.sqlite_path.as_ref().map(|p| p.as_path()), Some(Path::new("/tmp/scratch.sqlite3")));
    }

    #[test]
    pub fn config_has_defaults() {
        let config_lines = [
            "listens_path = listens.jsonl",
            "metadata_cache_path = cache.jsonl",
            "output_dir = out",
        ];
        let config = Config::parse(&config_lines).unwrap();
        assert_eq!(config.k.get(), 1000);
        assert_eq!(config.mode, Mode::Incremental);
        assert_eq!(&config.stats_range[..], "all_time");
        assert_eq!(config.backend, BackendKind::Memory);
        assert!(config.existing_snapshot_path.is_none());
        assert!(config.sqlite_path.is_none());
    }

    #[test]
    pub fn config_reports_line_of_invalid_value() {
        let config_lines = [
            "listens_path = listens.jsonl",
            "# The next line is wrong.",
            "k = 0",
        ];
        match Config::parse(&config_lines) {
            Err(Error::InvalidConfig(3, _)) => {}
            other => panic!("Expected error on line 3, got {:?}", other),
        }
    }

    #[test]
    pub fn config_rejects_unsafe_tags() {
        match Config::parse(&["stats_range = ../../etc"]) {
            Err(Error::InvalidConfig(1, _)) => {}
            other => panic!("Expected error on line 1, got {:?}", other),
        }
    }

    #[test]
    pub fn config_requires_paths() {
        match Config::parse(&["listens_path = listens.jsonl"]) {
            Err(Error::IncompleteConfig(_)) => {}
            other => panic!("Expected incomplete config, got {:?}", other),
        }
    }
}
