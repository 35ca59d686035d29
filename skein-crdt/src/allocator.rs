//! Dense position allocation.
//!
//! `allocate_between(low, high)` walks both paths level by level. At the
//! first level with a gap wider than one digit it draws a fresh digit inside
//! the gap and stops; otherwise it copies the lower neighbour's identifier
//! and descends. Missing bounds are virtual: digit 0 below, the level base
//! above. The base doubles with every level so deep paths keep gaining room.
//!
//! ```text
//!  level 0   base 32    [ 0 ........ low ... new ... high ........ 32 )
//!  level 1   base 64    [ 0 .................................... 64 )
//! ```
//!
//! Digits are not taken from the midpoint. Each level picks a strategy once
//! (`+` stays just above the lower neighbour, `-` just below the upper one)
//! and draws at random inside a window of `BOUNDARY` digits, which keeps
//! left-to-right and right-to-left typing from exhausting a level.
//!
//! A small window means the same path can come up again at a spot whose
//! previous occupant was deleted. The allocator remembers every path it has
//! handed out and, on a repeat, allocates again just above the repeated path.
//! Only this site puts its id on a leaf, so paths stay unique document-wide.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;

use crate::identifier::{Identifier, Position};
use crate::SiteId;

/// Digits available at level 0.
pub const BASE: u64 = 32;

/// Width of the random allocation window.
pub const BOUNDARY: u64 = 10;

/// `BASE << 58` is the largest base that still fits a `u64`.
const MAX_SHIFT: usize = 58;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Plus,
    Minus,
}

/// Allocates position paths on behalf of one site.
#[derive(Debug, Clone)]
pub struct PositionAllocator {
    site_id: SiteId,
    strategies: Vec<Strategy>,
    issued: FxHashSet<Position>,
    rng: StdRng,
}

impl PositionAllocator {
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            strategies: Vec::new(),
            issued: FxHashSet::default(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic allocator for tests and simulations.
    pub fn with_seed(site_id: SiteId, seed: u64) -> Self {
        Self {
            site_id,
            strategies: Vec::new(),
            issued: FxHashSet::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    /// Digits available at `level`.
    pub fn level_base(level: usize) -> u64 {
        BASE << level.min(MAX_SHIFT)
    }

    /// Number of paths this allocator has handed out.
    pub fn issued(&self) -> usize {
        self.issued.len()
    }

    /// Returns a path strictly between `low` and `high` that this allocator
    /// has never returned before.
    ///
    /// Either bound may be empty: an empty `low` means "document start", an
    /// empty `high` means "document end". Callers must pass `low < high`
    /// whenever both are present.
    pub fn allocate_between(&mut self, low: &Position, high: &Position) -> Position {
        debug_assert!(high.is_empty() || low < high, "allocation bounds out of order");

        let mut candidate = self.allocate_once(low, high);
        // Each retry sits above the last one and below `high`; the issued set
        // is finite, so some retry is fresh.
        while self.issued.contains(&candidate) {
            candidate = self.allocate_once(&candidate, high);
        }
        self.issued.insert(candidate.clone());
        candidate
    }

    fn allocate_once(&mut self, low: &Position, high: &Position) -> Position {
        let mut low = low.identifiers();
        let mut high = high.identifiers();
        let mut path = Vec::with_capacity(low.len().max(high.len()) + 1);
        let mut level = 0;

        loop {
            let base = Self::level_base(level);
            let lo = low.first().map_or(0, |id| id.digit);
            let hi = high.first().map_or(base, |id| id.digit);

            if hi.saturating_sub(lo) > 1 {
                let digit = self.digit_between(lo, hi, level);
                path.push(Identifier::new(digit, self.site_id));
                return Position::from(path);
            }

            match (low.first(), high.first()) {
                (Some(l), Some(h)) => {
                    path.push(*l);
                    high = if l == h { &high[1..] } else { &[] };
                    low = &low[1..];
                }
                (Some(l), None) => {
                    path.push(*l);
                    low = &low[1..];
                }
                (None, Some(h)) if h.digit == 0 => {
                    path.push(*h);
                    high = &high[1..];
                }
                (None, _) => {
                    path.push(Identifier::new(0, self.site_id));
                    high = &[];
                }
            }
            level += 1;
        }
    }

    fn digit_between(&mut self, lo: u64, hi: u64, level: usize) -> u64 {
        let (min, max) = if hi - lo <= BOUNDARY {
            (lo + 1, hi)
        } else {
            match self.strategy(level) {
                Strategy::Plus => (lo + 1, lo.saturating_add(1 + BOUNDARY).min(hi)),
                Strategy::Minus => (hi - BOUNDARY, hi),
            }
        };
        self.rng.gen_range(min..max)
    }

    fn strategy(&mut self, level: usize) -> Strategy {
        while self.strategies.len() <= level {
            let strategy = if self.rng.gen_bool(0.5) {
                Strategy::Plus
            } else {
                Strategy::Minus
            };
            self.strategies.push(strategy);
        }
        self.strategies[level]
    }
}
