// Playstats -- Incremental per-user listening statistics
// Copyright 2026 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! Primitive data types shared by all stages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The user id is the 64-bit integer assigned by the listen store.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// A non-negative number of listens.
pub type ListenCount = u64;

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which top-K lists a run forwards to consumers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Emit the top-K for every user in the merged table.
    Full,
    /// Emit the top-K only for touched users whose top-K changed.
    Incremental,
}

impl FromStr for Mode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Mode, &'static str> {
        match s {
            "true" => Ok(Mode::Incremental),
            "false" => Ok(Mode::Full),
            _ => Err("Invalid incremental value, must be 'true' or 'false'."),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Mode::Full => write!(f, "false"),
            Mode::Incremental => write!(f, "true"),
        }
    }
}

/// The cutoff K for top-K lists, always at least 1.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Cutoff(usize);

impl Cutoff {
    /// The cutoff when the config does not set `k`.
    pub const DEFAULT: Cutoff = Cutoff(1000);

    pub fn new(k: usize) -> Option<Cutoff> {
        if k == 0 { None } else { Some(Cutoff(k)) }
    }

    #[inline(always)]
    pub fn get(&self) -> usize {
        self.0
    }
}

impl FromStr for Cutoff {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Cutoff, &'static str> {
        match usize::from_str(s) {
            Ok(k) => Cutoff::new(k).ok_or("Invalid k value, must be at least 1."),
            Err(_) => Err("Invalid k value, must be a positive integer."),
        }
    }
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::{Cutoff, Mode};

    #[test]
    fn cutoff_rejects_zero() {
        assert_eq!(Cutoff::new(0), None);
        assert_eq!(Cutoff::from_str("0"), Err("Invalid k value, must be at least 1."));
        assert_eq!(Cutoff::from_str("-3").is_err(), true);
        assert_eq!(Cutoff::from_str("25").map(|k| k.get()), Ok(25));
    }

    #[test]
    fn mode_parses_booleans() {
        assert_eq!(Mode::from_str("true"), Ok(Mode::Incremental));
        assert_eq!(Mode::from_str("false"), Ok(Mode::Full));
        assert!(Mode::from_str("yes").is_err());
    }
}
