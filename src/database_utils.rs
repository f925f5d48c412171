// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Connecting to the SQLite database that the SQL backend computes in.

use std::path::Path;

use sqlite::Value;

pub type Result<T> = sqlite::Result<T>;

/// Open (or create) a scratch database for intermediate tables.
///
/// Pass ":memory:" to keep everything in memory.
pub fn connect_scratch<P: AsRef<Path>>(path: P) -> Result<sqlite::Connection> {
    // We use set_no_mutex, because the the connection will not be shared among
    // different threads.
    let flags = sqlite::OpenFlags::new()
        .set_read_write()
        .set_create()
        .set_no_mutex();
    let mut connection = sqlite::Connection::open_with_flags(path, flags)?;
    let timeout_ms = 10_000;
    connection.set_busy_timeout(timeout_ms)?;
    // The database only holds intermediate tables of a single run, which are
    // recomputed from scratch when the run is retried.
    connection.execute("PRAGMA journal_mode = OFF;")?;
    connection.execute("PRAGMA synchronous = OFF;")?;
    // Sorts and materialized subqueries spill to disk rather than to memory.
    connection.execute("PRAGMA temp_store = FILE;")?;
    Ok(connection)
}

/// Build an error for when the database returns something we did not expect.
pub fn unexpected(message: String) -> sqlite::Error {
    sqlite::Error {
        code: None,
        message: Some(message),
    }
}

/// Bind an optional string, `None` binds null.
pub fn bind_opt_str(statement: &mut sqlite::Statement, i: usize, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) => statement.bind(i, v),
        None => statement.bind(i, &Value::Null),
    }
}

/// Bind an optional integer, `None` binds null.
pub fn bind_opt_i64(statement: &mut sqlite::Statement, i: usize, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) => statement.bind(i, v),
        None => statement.bind(i, &Value::Null),
    }
}

/// Read a column that may be null and otherwise holds text.
pub fn read_opt_string(statement: &sqlite::Statement, i: usize) -> Result<Option<String>> {
    match statement.read::<Value>(i)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(unexpected(format!("Expected text or null in column {}, got {:?}.", i, other))),
    }
}

/// Read a column that may be null and otherwise holds an integer.
pub fn read_opt_i64(statement: &sqlite::Statement, i: usize) -> Result<Option<i64>> {
    match statement.read::<Value>(i)? {
        Value::Null => Ok(None),
        Value::Integer(x) => Ok(Some(x)),
        other => Err(unexpected(format!("Expected integer or null in column {}, got {:?}.", i, other))),
    }
}

/// Read a column that holds a non-negative integer.
pub fn read_count(statement: &sqlite::Statement, i: usize) -> Result<u64> {
    let x = statement.read::<i64>(i)?;
    if x < 0 {
        return Err(unexpected(format!("Expected a non-negative count in column {}, got {}.", i, x)))
    }
    Ok(x as u64)
}
