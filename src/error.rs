// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

use std::io;
use std::result;

use thiserror::Error;

use crate::prim::UserId;

#[derive(Debug, Error)]
pub enum Error {
    /// An input row is missing a required field or has a field of the wrong
    /// type. Contains the table name and the 1-based line number.
    #[error("Schema error in {source_name} on line {line}: {message}")]
    Schema {
        source_name: String,
        line: usize,
        message: String,
    },

    /// The query engine failed while executing an operation.
    #[error("Engine execution error: {0}")]
    Engine(#[from] sqlite::Error),

    /// An aggregate table contains the same (user, release) key twice.
    #[error("Aggregate contains user {user_id} with release '{release_name}' more than once.")]
    DuplicateKey {
        user_id: UserId,
        release_name: String,
    },

    /// Error in config file on a given (1-based) line.
    #[error("Invalid config on line {0}: {1}")]
    InvalidConfig(usize, &'static str),

    /// A key is missing in the config.
    #[error("Incomplete config: {0}")]
    IncompleteConfig(&'static str),

    /// A value could not be converted to or from json.
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

pub type Result<T> = result::Result<T, Error>;
