// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The composite key that identifies a release across listens and runs.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// One artist as credited on a release, from the metadata cache.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct CreditedArtist {
    pub artist_credit_name: String,
    pub artist_mbid: String,
    pub join_phrase: String,
}

/// Identifies the statistical subject, a release.
///
/// Every grouping and every join in this crate uses the `Eq` and `Hash`
/// instances of this type, and nothing else, so that the aggregator and the
/// merge agree on what "the same release" means:
///
/// * The release name is compared case-insensitively. Both sides are put in
///   Unicode Normalization Form C first, so a name typed with a combining
///   accent matches the precomposed one.
/// * All other fields are compared exactly.
/// * Optional fields are null-safe: two `None`s are equal, `None` never equals
///   `Some`. This is simply `Option`'s `Eq`.
///
/// A consequence of the last rule is that a release that is known by mbid in
/// one run and by name only in another run ends up as two different keys.
/// Upstream canonicalization must be deterministic across runs to avoid that.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub release_name: String,
    pub release_mbid: Option<String>,
    pub artist_name: String,
    pub artist_credit_mbids: Option<Vec<String>>,
    pub artists: Option<Vec<CreditedArtist>>,
    pub caa_id: Option<i64>,
    pub caa_release_mbid: Option<String>,
}

/// Iterate the characters of `name` as they participate in comparisons.
fn fold_name(name: &str) -> impl Iterator<Item = char> + '_ {
    name.nfc().flat_map(char::to_lowercase)
}

impl EntityIdentity {
    /// A release with just a name and artist, all optional fields null.
    pub fn named(release_name: &str, artist_name: &str) -> EntityIdentity {
        EntityIdentity {
            release_name: release_name.to_string(),
            release_mbid: None,
            artist_name: artist_name.to_string(),
            artist_credit_mbids: None,
            artists: None,
            caa_id: None,
            caa_release_mbid: None,
        }
    }

    /// Return the folded release name that equality is based on.
    pub fn name_key(&self) -> String {
        fold_name(&self.release_name).collect()
    }

    /// Whether the identity can take part in a ranking at all.
    pub fn is_eligible(&self) -> bool {
        !self.release_name.is_empty()
    }

    /// Return whether the two names are equal for the purpose of grouping.
    pub fn names_equal(a: &str, b: &str) -> bool {
        fold_name(a).eq(fold_name(b))
    }
}

impl PartialEq for EntityIdentity {
    fn eq(&self, other: &EntityIdentity) -> bool {
        // Compare the cheap exact fields first, folding is the slow part.
        self.release_mbid == other.release_mbid
            && self.artist_name == other.artist_name
            && self.artist_credit_mbids == other.artist_credit_mbids
            && self.caa_id == other.caa_id
            && self.caa_release_mbid == other.caa_release_mbid
            && self.artists == other.artists
            && EntityIdentity::names_equal(&self.release_name, &other.release_name)
    }
}

impl Eq for EntityIdentity {}

impl Hash for EntityIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut n = 0_usize;
        for ch in fold_name(&self.release_name) {
            ch.hash(state);
            n += 1;
        }
        state.write_usize(n);
        self.release_mbid.hash(state);
        self.artist_name.hash(state);
        self.artist_credit_mbids.hash(state);
        self.artists.hash(state);
        self.caa_id.hash(state);
        self.caa_release_mbid.hash(state);
    }
}
