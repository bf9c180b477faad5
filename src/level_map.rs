//! PriceLevelMap - one side of the book as a lock-free ordered map.
//!
//! Backed by a skip list with epoch-based garbage collection: any number
//! of threads may look up and traverse concurrently with the single
//! writer, without locks, and a removed node is physically reclaimed
//! only once no thread can still hold a reference into it.

use crossbeam_skiplist::SkipMap;

use crate::message::Side;
use crate::price::{Price, Quantity};

/// An ordered map from price to resting quantity for one side of the book.
///
/// Bid maps iterate price-descending (best = highest), ask maps iterate
/// price-ascending (best = lowest). The asymmetry is encoded in the key:
/// ask keys are raw cents, bid keys are the cents' complement, so the
/// skip list's front entry is the best level on either side.
///
/// # Concurrency
///
/// Any number of threads may call [`best`](Self::best),
/// [`level`](Self::level) and [`iter`](Self::iter) concurrently with the
/// single thread calling [`upsert`](Self::upsert) and
/// [`erase`](Self::erase). Each entry is replaced atomically, so a
/// reader never observes a partially written level. Cross-key
/// consistency is NOT guaranteed: a traversal overlapping writer
/// progress may see a mix of pre- and post-update states across
/// different prices. Best-of-book queries read one key and are
/// unaffected.
pub struct PriceLevelMap {
    side: Side,
    levels: SkipMap<u64, Quantity>,
}

impl PriceLevelMap {
    /// Create an empty map for the given side.
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: SkipMap::new(),
        }
    }

    /// Which side this map orders for.
    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    fn encode(side: Side, price: Price) -> u64 {
        match side {
            Side::Ask => price.cents(),
            // Complement so the highest bid sorts first.
            Side::Bid => u64::MAX - price.cents(),
        }
    }

    #[inline]
    fn decode(side: Side, key: u64) -> Price {
        match side {
            Side::Ask => Price::from_cents(key),
            Side::Bid => Price::from_cents(u64::MAX - key),
        }
    }

    /// Insert the level or replace its quantity. Replace, never
    /// accumulate: the new quantity is the level's absolute size.
    ///
    /// Single-writer only.
    pub fn upsert(&self, price: Price, qty: Quantity) {
        debug_assert!(qty > 0.0, "zero quantity is the erase signal, not a value");
        self.levels.insert(Self::encode(self.side, price), qty);
    }

    /// Logically remove the level. A miss is a no-op, not an error.
    /// Physical reclamation is deferred until no reader holds the node.
    ///
    /// Single-writer only.
    pub fn erase(&self, price: Price) {
        self.levels.remove(&Self::encode(self.side, price));
    }

    /// The first level in this side's order (highest bid / lowest ask),
    /// or `None` if the side is empty.
    pub fn best(&self) -> Option<(Price, Quantity)> {
        self.levels
            .front()
            .map(|entry| (Self::decode(self.side, *entry.key()), *entry.value()))
    }

    /// Point lookup of one level's quantity.
    pub fn level(&self, price: Price) -> Option<Quantity> {
        self.levels
            .get(&Self::encode(self.side, price))
            .map(|entry| *entry.value())
    }

    /// Lazy traversal in this side's order. Finite, restartable, and safe
    /// to run concurrently with the writer (see the type-level note on
    /// cross-key consistency).
    pub fn iter(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        let side = self.side;
        self.levels
            .iter()
            .map(move |entry| (Self::decode(side, *entry.key()), *entry.value()))
    }

    /// Number of levels currently resting on this side.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns true if the side has no levels.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl std::fmt::Debug for PriceLevelMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceLevelMap")
            .field("side", &self.side)
            .field("levels", &self.levels.len())
            .field("best", &self.best())
            .finish()
    }
}
