//! Book - the mirrored order book and the applier's update protocol.
//!
//! Owns the two price-level maps and the initialization barrier. The
//! maps are populated exclusively through [`Book::apply`], which exactly
//! one thread (the applier) may call; every other thread is a reader.

use tracing::trace;

use crate::barrier::InitBarrier;
use crate::level_map::PriceLevelMap;
use crate::message::{LevelChange, Side, UpdateRecord};
use crate::price::{Price, Quantity};
use std::time::Duration;

/// A live mirror of one product's level2 book.
///
/// State is exactly the initial snapshot plus every delta applied since,
/// in arrival order, with zero-quantity levels absent. Readers see that
/// state lock-free; see [`PriceLevelMap`] for the per-key consistency
/// contract.
#[derive(Debug)]
pub struct Book {
    bids: PriceLevelMap,
    asks: PriceLevelMap,
    init: InitBarrier,
}

impl Book {
    /// Create an empty, not-yet-initialized book.
    pub fn new() -> Self {
        Self {
            bids: PriceLevelMap::new(Side::Bid),
            asks: PriceLevelMap::new(Side::Ask),
            init: InitBarrier::new(),
        }
    }

    // ========================================================================
    // Applier protocol (single writer)
    // ========================================================================

    /// Apply one update record. Single-writer: only the applier thread
    /// may call this.
    ///
    /// The first snapshot satisfies the init barrier; a later snapshot
    /// (feed resynchronization after a reconnect) is applied to the maps
    /// without re-firing it.
    pub fn apply(&self, record: UpdateRecord) {
        match record {
            UpdateRecord::Snapshot { bids, asks } => self.apply_snapshot(bids, asks),
            UpdateRecord::Changes { time, changes } => {
                trace!(?time, n = changes.len(), "applying change batch");
                for change in changes {
                    self.apply_change(change);
                }
            }
        }
    }

    fn apply_snapshot(&self, bids: Vec<(Price, Quantity)>, asks: Vec<(Price, Quantity)>) {
        trace!(
            bids = bids.len(),
            asks = asks.len(),
            "applying snapshot"
        );
        // A zero-size snapshot level is not a resting entry; skip it.
        for (price, qty) in bids {
            if qty > 0.0 {
                self.bids.upsert(price, qty);
            }
        }
        for (price, qty) in asks {
            if qty > 0.0 {
                self.asks.upsert(price, qty);
            }
        }
        if !self.init.is_satisfied() {
            self.init.satisfy();
        }
    }

    fn apply_change(&self, change: LevelChange) {
        let map = self.side(change.side);
        if change.qty == 0.0 {
            map.erase(change.price);
        } else {
            map.upsert(change.price, change.qty);
        }
    }

    // ========================================================================
    // Readers (any thread, lock-free)
    // ========================================================================

    /// The map for one side.
    #[inline]
    pub fn side(&self, side: Side) -> &PriceLevelMap {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// The bid-side map (price-descending).
    #[inline]
    pub fn bids(&self) -> &PriceLevelMap {
        &self.bids
    }

    /// The ask-side map (price-ascending).
    #[inline]
    pub fn asks(&self) -> &PriceLevelMap {
        &self.asks
    }

    /// Highest resting buy level.
    #[inline]
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.best()
    }

    /// Lowest resting sell level.
    #[inline]
    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.best()
    }

    /// Bid levels, best (highest) first.
    pub fn iter_bids(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.bids.iter()
    }

    /// Ask levels, best (lowest) first.
    pub fn iter_asks(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.asks.iter()
    }

    /// Best-ask minus best-bid, in cents. `None` while either side is
    /// empty or the mirror is transiently crossed mid-batch.
    pub fn spread(&self) -> Option<u64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) if ask > bid => Some(ask.cents() - bid.cents()),
            _ => None,
        }
    }

    // ========================================================================
    // Initialization gate
    // ========================================================================

    /// True once the first snapshot has been fully applied.
    pub fn is_ready(&self) -> bool {
        self.init.is_satisfied()
    }

    /// Park until the first snapshot has been applied.
    pub fn wait_ready(&self) {
        self.init.wait();
    }

    /// Park up to `timeout`; returns false if the book is still
    /// uninitialized when the window closes.
    pub fn wait_ready_timeout(&self, timeout: Duration) -> bool {
        self.init.wait_timeout(timeout)
    }
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(cents: u64) -> Price {
        Price::from_cents(cents)
    }

    fn snapshot() -> UpdateRecord {
        UpdateRecord::Snapshot {
            bids: vec![(p(10025), 3.0)],
            asks: vec![(p(10100), 2.5)],
        }
    }

    fn changes(list: Vec<(Side, u64, f64)>) -> UpdateRecord {
        UpdateRecord::Changes {
            time: None,
            changes: list
                .into_iter()
                .map(|(side, cents, qty)| LevelChange {
                    side,
                    price: p(cents),
                    qty,
                })
                .collect(),
        }
    }

    #[test]
    fn test_snapshot_establishes_state() {
        let book = Book::new();
        assert!(!book.is_ready());

        book.apply(snapshot());

        assert!(book.is_ready());
        assert_eq!(book.best_bid(), Some((p(10025), 3.0)));
        assert_eq!(book.best_ask(), Some((p(10100), 2.5)));
        assert_eq!(book.spread(), Some(75));
    }

    #[test]
    fn test_zero_size_deletes() {
        let book = Book::new();
        book.apply(snapshot());
        book.apply(changes(vec![(Side::Bid, 10025, 0.0)]));

        assert_eq!(book.best_bid(), None);
        assert!(book.bids().is_empty());
    }

    #[test]
    fn test_zero_size_on_absent_key_is_noop() {
        let book = Book::new();
        book.apply(UpdateRecord::Snapshot {
            bids: vec![],
            asks: vec![],
        });
        book.apply(changes(vec![(Side::Bid, 99900, 0.0)]));

        assert!(book.bids().is_empty());
    }

    #[test]
    fn test_update_replaces_never_accumulates() {
        let book = Book::new();
        book.apply(snapshot());
        book.apply(changes(vec![(Side::Ask, 10100, 5.0)]));

        assert_eq!(book.best_ask(), Some((p(10100), 5.0)));
    }

    #[test]
    fn test_update_of_absent_key_inserts() {
        let book = Book::new();
        book.apply(snapshot());
        book.apply(changes(vec![(Side::Bid, 10030, 1.5)]));

        assert_eq!(book.best_bid(), Some((p(10030), 1.5)));
    }

    #[test]
    fn test_in_batch_order_preserved() {
        let book = Book::new();
        book.apply(snapshot());
        // Same price written twice in one batch: the later entry wins.
        book.apply(changes(vec![
            (Side::Ask, 10100, 9.0),
            (Side::Ask, 10100, 4.0),
        ]));

        assert_eq!(book.best_ask(), Some((p(10100), 4.0)));
    }

    #[test]
    fn test_second_snapshot_does_not_refire_barrier() {
        let book = Book::new();
        book.apply(snapshot());
        assert!(book.is_ready());

        // Resynchronization snapshot: applied, no panic, still ready.
        book.apply(UpdateRecord::Snapshot {
            bids: vec![(p(10010), 7.0)],
            asks: vec![(p(10090), 1.0)],
        });
        assert!(book.is_ready());
        assert_eq!(book.best_bid(), Some((p(10025), 3.0)));
        assert_eq!(book.best_ask(), Some((p(10090), 1.0)));
    }

    #[test]
    fn test_wait_ready_unblocks_on_snapshot() {
        use std::sync::Arc;

        let book = Arc::new(Book::new());
        let waiter = {
            let book = Arc::clone(&book);
            std::thread::spawn(move || {
                book.wait_ready();
                book.best_bid()
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        book.apply(snapshot());
        assert_eq!(waiter.join().unwrap(), Some((p(10025), 3.0)));
    }
}
