// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Executing the operations as SQL queries against SQLite.
//!
//! Every operation loads its inputs into a table, runs one set-oriented query,
//! and reads the result back. When the database is a file rather than
//! ":memory:", the intermediate tables, sorts, and window partitions live on
//! disk, so the working set of an operation can exceed memory.
//!
//! A few things need care to get exactly the same result as the memory
//! backend:
//!
//! * The release name is grouped and joined on `name_key`, which is computed by
//!   [`EntityIdentity::name_key`], not by SQLite's `lower`, which only folds
//!   ASCII.
//! * Nullable key columns are compared with `is`, SQLite's null-safe equality.
//! * List-valued fields are stored as json text. Serialization is
//!   deterministic, so equal lists have equal text.
//! * Every table has a `seq` column with the position of the row in the input,
//!   and every query orders by it explicitly, so ties are broken by input
//!   order rather than by whatever order the query plan happens to produce.

use std::collections::HashSet;
use std::convert::TryFrom;
use std::path::Path;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlite::State;

use crate::aggregate::AggregateRow;
use crate::backend::AggregationBackend;
use crate::database_utils::{
    bind_opt_i64, bind_opt_str, connect_scratch, read_count, read_opt_i64, read_opt_string,
    unexpected,
};
use crate::error::{Error, Result};
use crate::identity::EntityIdentity;
use crate::merge::MergedRow;
use crate::normalize::NormalizedListen;
use crate::prim::{Cutoff, UserId};
use crate::topk::{RankedRelease, Selection, TopKEntry};

/// Columns shared by all tables, after `seq`.
const IDENTITY_COLUMNS: &str = "
    , user_id             integer not null
    , release_name        text    not null
    , name_key            text    not null
    , release_mbid        text    null
    , artist_name         text    not null
    , artist_credit_mbids text    null
    , artists             text    null
    , caa_id              integer null
    , caa_release_mbid    text    null
";

/// Executes every operation in SQLite.
pub struct SqliteBackend {
    connection: sqlite::Connection,
}

/// Return the condition under which the rows `a` and `b` have the same key.
fn key_match(a: &str, b: &str) -> String {
    format!(
        "{a}.user_id = {b}.user_id \
         and {a}.name_key = {b}.name_key \
         and {a}.release_mbid is {b}.release_mbid \
         and {a}.artist_name = {b}.artist_name \
         and {a}.artist_credit_mbids is {b}.artist_credit_mbids \
         and {a}.artists is {b}.artists \
         and {a}.caa_id is {b}.caa_id \
         and {a}.caa_release_mbid is {b}.caa_release_mbid",
        a = a,
        b = b,
    )
}

fn encode_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    match value {
        Some(v) => Ok(Some(serde_json::to_string(v)?)),
        None => Ok(None),
    }
}

fn decode_json<T: DeserializeOwned>(value: Option<String>) -> Result<Option<T>> {
    match value {
        Some(v) => Ok(Some(serde_json::from_str(&v)?)),
        None => Ok(None),
    }
}

/// Read an identity from the 7 columns starting at `i`.
///
/// The columns must be in the order release_name, release_mbid, artist_name,
/// artist_credit_mbids, artists, caa_id, caa_release_mbid.
fn read_identity(statement: &sqlite::Statement, i: usize) -> Result<EntityIdentity> {
    let identity = EntityIdentity {
        release_name: statement.read::<String>(i)?,
        release_mbid: read_opt_string(statement, i + 1)?,
        artist_name: statement.read::<String>(i + 2)?,
        artist_credit_mbids: decode_json(read_opt_string(statement, i + 3)?)?,
        artists: decode_json(read_opt_string(statement, i + 4)?)?,
        caa_id: read_opt_i64(statement, i + 5)?,
        caa_release_mbid: read_opt_string(statement, i + 6)?,
    };
    Ok(identity)
}

impl SqliteBackend {
    /// Compute in the database at `path`, which is created if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SqliteBackend> {
        let backend = SqliteBackend {
            connection: connect_scratch(path)?,
        };
        Ok(backend)
    }

    pub fn in_memory() -> Result<SqliteBackend> {
        SqliteBackend::open(":memory:")
    }

    fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteBackend) -> Result<T>,
    {
        self.connection.execute("begin;")?;
        match f(self) {
            Ok(v) => {
                self.connection.execute("commit;")?;
                Ok(v)
            }
            Err(err) => {
                // The original error is more interesting than a failure to
                // roll back, if any.
                let _ = self.connection.execute("rollback;");
                Err(err)
            }
        }
    }

    /// (Re)create a table with the identity columns plus `count_columns`.
    fn create_table(&self, table: &str, count_columns: &[&str]) -> Result<()> {
        let mut extra = String::new();
        for column in count_columns {
            extra.push_str(&format!("    , {} integer not null\n", column));
        }
        self.connection.execute(format!("drop table if exists {};", table))?;
        self.connection.execute(format!(
            "create table {} ( seq integer primary key {} {} );",
            table, IDENTITY_COLUMNS, extra,
        ))?;
        self.connection.execute(format!(
            "create index ix_{}_key on {} (user_id, name_key);",
            table, table,
        ))?;
        Ok(())
    }

    /// Insert rows into a table made by `create_table`, numbering them in order.
    fn insert_rows<'a, I, C>(&self, table: &str, count_columns: &[&str], rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = (UserId, &'a EntityIdentity, C)>,
        C: AsRef<[u64]>,
    {
        let mut columns = String::from(
            "seq, user_id, release_name, name_key, release_mbid, artist_name, \
             artist_credit_mbids, artists, caa_id, caa_release_mbid",
        );
        for column in count_columns {
            columns.push_str(", ");
            columns.push_str(column);
        }
        let placeholders = vec!["?"; 10 + count_columns.len()].join(", ");
        let mut statement = self.connection.prepare(format!(
            "insert into {} ({}) values ({});",
            table, columns, placeholders,
        ))?;

        let mut n = 0;
        for (seq, (user_id, identity, counts)) in rows.into_iter().enumerate() {
            statement.reset()?;
            statement.bind(1, seq as i64)?;
            statement.bind(2, user_id.0)?;
            statement.bind(3, &identity.release_name[..])?;
            statement.bind(4, &identity.name_key()[..])?;
            bind_opt_str(&mut statement, 5, identity.release_mbid.as_deref())?;
            statement.bind(6, &identity.artist_name[..])?;
            bind_opt_str(&mut statement, 7, encode_json(&identity.artist_credit_mbids)?.as_deref())?;
            bind_opt_str(&mut statement, 8, encode_json(&identity.artists)?.as_deref())?;
            bind_opt_i64(&mut statement, 9, identity.caa_id)?;
            bind_opt_str(&mut statement, 10, identity.caa_release_mbid.as_deref())?;
            for (j, count) in counts.as_ref().iter().enumerate() {
                let count = i64::try_from(*count).map_err(|_| {
                    unexpected(format!("Listen count {} does not fit in an SQLite integer.", count))
                })?;
                statement.bind(11 + j, count)?;
            }
            statement.next()?;
            n += 1;
        }

        Ok(n)
    }

    /// Fail with `DuplicateKey` if the table has two rows with the same key.
    fn check_unique(&self, table: &str) -> Result<()> {
        let mut statement = self.connection.prepare(format!(
            "
            select t.user_id, t.release_name
            from {t} t
            where exists (select 1 from {t} u where u.seq < t.seq and {cond})
            order by t.seq
            limit 1;
            ",
            t = table,
            cond = key_match("u", "t"),
        ))?;

        if let State::Row = statement.next()? {
            return Err(Error::DuplicateKey {
                user_id: UserId(statement.read::<i64>(0)?),
                release_name: statement.read::<String>(1)?,
            })
        }

        Ok(())
    }

    fn load_aggregate(&self, table: &str, rows: &[AggregateRow]) -> Result<()> {
        self.create_table(table, &["listen_count"])?;
        self.in_transaction(|b| {
            b.insert_rows(
                table,
                &["listen_count"],
                rows.iter().map(|r| (r.user_id, &r.identity, [r.listen_count])),
            )
        })?;
        self.check_unique(table)
    }
}

impl AggregationBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn partial_aggregate(&mut self, rows: &[NormalizedListen]) -> Result<Vec<AggregateRow>> {
        self.create_table("normalized", &[])?;
        let n = self.in_transaction(|b| {
            b.insert_rows(
                "normalized",
                &[],
                rows.iter().map(|r| (r.user_id, &r.identity, [0_u64; 0])),
            )
        })?;
        debug!("SQLite: loaded {} normalized listens.", n);

        // Every group takes its descriptive fields from its first row, which
        // is where the representative name comes from.
        let mut statement = self.connection.prepare(
            "
            select
                n.user_id
              , n.release_name
              , n.release_mbid
              , n.artist_name
              , n.artist_credit_mbids
              , n.artists
              , n.caa_id
              , n.caa_release_mbid
              , g.listen_count
            from
              ( select min(seq) as first_seq
                     , count(*) as listen_count
                from normalized
                group by user_id
                       , name_key
                       , release_mbid
                       , artist_name
                       , artist_credit_mbids
                       , artists
                       , caa_id
                       , caa_release_mbid
              ) g
              join normalized n on n.seq = g.first_seq
            order by g.first_seq;
            ",
        )?;

        let mut result = Vec::new();
        while let State::Row = statement.next()? {
            result.push(AggregateRow {
                user_id: UserId(statement.read::<i64>(0)?),
                identity: read_identity(&statement, 1)?,
                listen_count: read_count(&statement, 8)?,
            });
        }

        Ok(result)
    }

    fn merge_outer_join(
        &mut self,
        existing: &[AggregateRow],
        new: &[AggregateRow],
    ) -> Result<Vec<MergedRow>> {
        self.load_aggregate("existing_stats", existing)?;
        self.load_aggregate("new_stats", new)?;
        debug!(
            "SQLite: loaded {} existing and {} new aggregate rows.",
            existing.len(),
            new.len(),
        );

        // SQLite only has a full outer join since 3.39, so we build it from a
        // left join plus the anti-join for the rows that are only in `new`.
        let mut statement = self.connection.prepare(format!(
            "
            select
                0 as side
              , e.seq as seq
              , e.user_id
              , coalesce(n.release_name, e.release_name)
              , coalesce(n.release_mbid, e.release_mbid)
              , coalesce(n.artist_name, e.artist_name)
              , coalesce(n.artist_credit_mbids, e.artist_credit_mbids)
              , coalesce(n.artists, e.artists)
              , coalesce(n.caa_id, e.caa_id)
              , coalesce(n.caa_release_mbid, e.caa_release_mbid)
              , e.listen_count
              , e.listen_count + coalesce(n.listen_count, 0)
            from
              existing_stats e
              left join new_stats n on {cond_left}
            union all
            select
                1 as side
              , n.seq as seq
              , n.user_id
              , n.release_name
              , n.release_mbid
              , n.artist_name
              , n.artist_credit_mbids
              , n.artists
              , n.caa_id
              , n.caa_release_mbid
              , 0
              , n.listen_count
            from
              new_stats n
            where
              not exists (select 1 from existing_stats e where {cond_anti})
            order by side, seq;
            ",
            cond_left = key_match("n", "e"),
            cond_anti = key_match("e", "n"),
        ))?;

        let mut result = Vec::with_capacity(existing.len() + new.len());
        while let State::Row = statement.next()? {
            result.push(MergedRow {
                user_id: UserId(statement.read::<i64>(2)?),
                identity: read_identity(&statement, 3)?,
                old_listen_count: read_count(&statement, 10)?,
                new_listen_count: read_count(&statement, 11)?,
            });
        }

        Ok(result)
    }

    fn rank_and_truncate(
        &mut self,
        merged: &[MergedRow],
        selection: Selection,
        k: Cutoff,
    ) -> Result<Vec<TopKEntry>> {
        let counts = &["old_listen_count", "new_listen_count"];
        self.create_table("merged", counts)?;
        self.in_transaction(|b| {
            b.insert_rows(
                "merged",
                counts,
                merged
                    .iter()
                    .map(|r| (r.user_id, &r.identity, [r.old_listen_count, r.new_listen_count])),
            )
        })?;

        let (filter, gate) = match selection {
            Selection::Full => ("", ""),
            Selection::Incremental(touched) => {
                self.load_touched(touched)?;
                (
                    "where user_id in (select user_id from touched)",
                    "where user_id in
                       ( select user_id
                         from kept
                         group by user_id
                         having max(new_listen_count <> old_listen_count) = 1
                       )",
                )
            }
        };

        let mut statement = self.connection.prepare(format!(
            "
            with selected as (
              select * from merged {filter}
            ),
            ranked as (
              select
                  s.*
                , row_number() over (
                    partition by s.user_id
                    order by s.new_listen_count desc, s.seq asc
                  ) as row_rank
                , count(*) over (partition by s.user_id) as total
                , min(s.seq) over (partition by s.user_id) as user_seq
              from selected s
            ),
            kept as (
              select * from ranked where row_rank <= ?
            )
            select
                user_id
              , total
              , release_name
              , release_mbid
              , artist_name
              , artist_credit_mbids
              , artists
              , caa_id
              , caa_release_mbid
              , old_listen_count
              , new_listen_count
            from kept
            {gate}
            order by user_seq asc, row_rank desc;
            ",
            filter = filter,
            gate = gate,
        ))?;
        // A cutoff beyond what SQLite can represent keeps every row anyway.
        statement.bind(1, i64::try_from(k.get()).unwrap_or(i64::MAX))?;

        // Rows arrive grouped by user, and within a user in ascending order
        // of count, which is the order in which we emit them.
        let mut result: Vec<TopKEntry> = Vec::new();
        while let State::Row = statement.next()? {
            let user_id = UserId(statement.read::<i64>(0)?);
            let total = read_count(&statement, 1)? as usize;
            let row = MergedRow {
                user_id: user_id,
                identity: read_identity(&statement, 2)?,
                old_listen_count: read_count(&statement, 9)?,
                new_listen_count: read_count(&statement, 10)?,
            };
            let release = RankedRelease::from_merged(&row);
            match result.last_mut() {
                Some(entry) if entry.user_id == user_id => entry.releases.push(release),
                _ => result.push(TopKEntry {
                    user_id: user_id,
                    releases: vec![release],
                    count: total,
                }),
            }
        }

        Ok(result)
    }
}

impl SqliteBackend {
    fn load_touched(&self, touched: &HashSet<UserId>) -> Result<()> {
        self.connection.execute("drop table if exists touched;")?;
        self.connection.execute("create table touched (user_id integer primary key);")?;
        self.in_transaction(|b| {
            let mut statement = b.connection.prepare("insert into touched (user_id) values (?);")?;
            for user_id in touched {
                statement.reset()?;
                statement.bind(1, user_id.0)?;
                statement.next()?;
            }
            Ok(())
        })?;
        debug!("SQLite: loaded {} touched users.", touched.len());
        Ok(())
    }
}
