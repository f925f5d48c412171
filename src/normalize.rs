// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Turning raw listens into one canonical (user, release) row per listen.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::{CreditedArtist, EntityIdentity};
use crate::prim::UserId;

/// A listen as stored by the ingestion subsystem.
///
/// Only the fields that the release statistics need are deserialized, any
/// other fields in the input are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListen {
    pub user_id: UserId,
    #[serde(default)]
    pub release_mbid: Option<String>,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub artist_credit_mbids: Option<Vec<String>>,
}

/// Canonical release metadata, keyed on release mbid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub release_mbid: String,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub album_artist_name: Option<String>,
    #[serde(default)]
    pub artist_credit_mbids: Option<Vec<String>>,
    #[serde(default)]
    pub artists: Option<Vec<CreditedArtist>>,
    #[serde(default)]
    pub caa_id: Option<i64>,
    #[serde(default)]
    pub caa_release_mbid: Option<String>,
}

/// Read-only lookup of release metadata.
///
/// The cache is owned and refreshed by an external process, we only ever
/// look things up in it.
pub trait MetadataCache {
    fn get(&self, release_mbid: &str) -> Option<&ReleaseMetadata>;
}

/// A metadata cache that holds all releases in a hash map.
pub struct MemoryMetadataCache {
    releases: HashMap<String, ReleaseMetadata>,
}

impl MemoryMetadataCache {
    pub fn new() -> MemoryMetadataCache {
        MemoryMetadataCache {
            releases: HashMap::new(),
        }
    }

    /// Build the cache from rows. If an mbid occurs more than once, the first
    /// occurrence is used.
    pub fn from_rows<I: IntoIterator<Item = ReleaseMetadata>>(rows: I) -> MemoryMetadataCache {
        let mut cache = MemoryMetadataCache::new();
        for row in rows {
            cache.releases.entry(row.release_mbid.clone()).or_insert(row);
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }
}

impl MetadataCache for MemoryMetadataCache {
    fn get(&self, release_mbid: &str) -> Option<&ReleaseMetadata> {
        self.releases.get(release_mbid)
    }
}

/// One listen, attributed to a canonical release identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedListen {
    pub user_id: UserId,
    pub identity: EntityIdentity,
}

/// The output of normalizing a batch of listens.
#[derive(Debug, Default)]
pub struct Normalized {
    pub rows: Vec<NormalizedListen>,
    /// Number of listens in the input.
    pub read: usize,
    /// Number of listens dropped because no release name could be resolved.
    pub dropped: usize,
}

/// Resolve a single listen against the cache.
///
/// Returns `None` if the listen has no usable release name, such a listen
/// cannot contribute to any ranking.
pub fn normalize_listen(listen: &RawListen, cache: &dyn MetadataCache) -> Option<NormalizedListen> {
    // An empty mbid is as good as no mbid.
    let release_mbid = match listen.release_mbid.as_ref() {
        Some(mbid) if !mbid.is_empty() => Some(mbid.clone()),
        _ => None,
    };
    let meta = release_mbid.as_ref().and_then(|mbid| cache.get(mbid));

    // Every field prefers the cache when the mbid resolves and the cache has
    // a value, and falls back to the value inline in the listen otherwise.
    let release_name = meta
        .and_then(|m| m.release_name.as_ref())
        .or(listen.release_name.as_ref())?;

    if release_name.is_empty() {
        return None
    }

    let artist_name = meta
        .and_then(|m| m.album_artist_name.as_ref())
        .or(listen.artist_name.as_ref())
        .cloned()
        .unwrap_or_default();

    let artist_credit_mbids = meta
        .and_then(|m| m.artist_credit_mbids.as_ref())
        .or(listen.artist_credit_mbids.as_ref())
        .cloned();

    let identity = EntityIdentity {
        release_name: release_name.clone(),
        release_mbid: release_mbid,
        artist_name: artist_name,
        artist_credit_mbids: artist_credit_mbids,
        // The remaining descriptors only exist in the cache.
        artists: meta.and_then(|m| m.artists.clone()),
        caa_id: meta.and_then(|m| m.caa_id),
        caa_release_mbid: meta.and_then(|m| m.caa_release_mbid.clone()),
    };

    Some(NormalizedListen {
        user_id: listen.user_id,
        identity: identity,
    })
}

/// Normalize a batch of listens, counting the ones that had to be dropped.
pub fn normalize(listens: &[RawListen], cache: &dyn MetadataCache) -> Normalized {
    let mut result = Normalized {
        rows: Vec::with_capacity(listens.len()),
        read: listens.len(),
        dropped: 0,
    };

    for listen in listens {
        match normalize_listen(listen, cache) {
            Some(row) => result.rows.push(row),
            None => result.dropped += 1,
        }
    }

    result
}
