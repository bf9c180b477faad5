//! # Book-Mirror
//!
//! A live, lock-free mirror of an exchange level2 order book.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: one applier thread owns all map mutation
//! - **Lock-Free Reads**: any number of threads query and traverse the
//!   book concurrently, without blocking the writer or each other
//! - **Deferred Reclamation**: removed levels are freed by the epoch GC
//!   only once no reader can still reference them
//! - **Snapshot-then-Delta**: construction blocks until the feed's first
//!   snapshot is fully applied; deltas stream in feed order after it
//!
//! ## Architecture
//!
//! ```text
//! [Feed Thread] --> [Update Queue] --> [Applier Thread (sole writer)]
//!                                               |
//!                                        [Book: bid/ask maps] <-- reader threads
//! ```

pub mod barrier;
pub mod book;
pub mod engine;
pub mod feed;
pub mod level_map;
pub mod message;
pub mod price;
pub mod queue;

// Re-exports for convenience
pub use barrier::InitBarrier;
pub use book::Book;
pub use engine::{Engine, EngineConfig, EngineError, EngineState, DEFAULT_ENDPOINT};
pub use feed::{CoinbaseFeed, FeedError, FeedSource, ReconnectPolicy, StopSignal, SyntheticFeed};
pub use level_map::PriceLevelMap;
pub use message::{DecodeError, LevelChange, Side, UpdateRecord};
pub use price::{Price, Quantity};
pub use queue::{DepthProbe, DequeueError, UpdateConsumer, UpdateProducer};

/// Register the calling thread with the epoch reclamation subsystem.
///
/// Registration otherwise happens lazily on a thread's first map access;
/// calling this once up front moves that cost off the hot path. Safe to
/// call more than once.
pub fn register_thread() {
    drop(crossbeam_epoch::pin());
}
