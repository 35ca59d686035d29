//! Identifiers and position paths.
//!
//! A position path is a growable sequence of `(digit, site)` pairs, one per
//! tree level. Derived ordering gives exactly the order the CRDT needs:
//! identifiers compare by digit, then by site; paths compare level by level
//! and a prefix sorts before any path that extends it.

use serde::{Deserialize, Serialize};

use crate::SiteId;

/// One level of a position path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub digit: u64,
    pub site_id: SiteId,
}

impl Identifier {
    pub fn new(digit: u64, site_id: SiteId) -> Self {
        Self { digit, site_id }
    }
}

/// Totally ordered sort key of a character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(Vec<Identifier>);

impl Position {
    /// The empty path: the virtual boundary before the first or after the
    /// last character.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.0
    }

    /// Number of levels in the path.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Identifier>> for Position {
    fn from(ids: Vec<Identifier>) -> Self {
        Self(ids)
    }
}
