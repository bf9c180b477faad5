//! Engine - lifecycle controller for the mirror's two background threads.
//!
//! Wires feed -> queue -> applier -> book, enforces the shutdown
//! ordering (producer first, then consumer), and gates construction on
//! the first snapshot.
//!
//! ```text
//! [Feed Thread] --> [Update Queue] --> [Applier Thread (sole writer)]
//!                                               |
//!                                        [Book: bid/ask maps] <-- reader threads
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::book::Book;
use crate::feed::{CoinbaseFeed, FeedSource, ReconnectPolicy, StopSignal};
use crate::price::{Price, Quantity};
use crate::queue::{self, DepthProbe, DequeueError, UpdateConsumer};

/// Default production endpoint for the level2 channel.
pub const DEFAULT_ENDPOINT: &str = "wss://ws-feed.exchange.coinbase.com";

/// How long the applier parks between stop-flag checks when idle.
const APPLIER_PARK: Duration = Duration::from_millis(50);

/// Engine construction parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Product the mirror tracks, e.g. `"BTC-USD"`. One per engine.
    pub product: String,
    /// wss endpoint of the level2 feed
    pub endpoint: String,
    /// Queue depth above which the producer logs a backlog warning
    pub queue_warn_depth: usize,
    /// Pin the applier thread to the last CPU core
    pub pin_applier: bool,
    /// Bound on the construction wait for the first snapshot;
    /// `None` waits forever
    pub init_timeout: Option<Duration>,
    /// Reconnect policy for the live feed
    pub reconnect: ReconnectPolicy,
}

impl EngineConfig {
    /// Defaults for one product against the production endpoint.
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            queue_warn_depth: queue::DEFAULT_WARN_DEPTH,
            pin_applier: false,
            init_timeout: Some(Duration::from_secs(30)),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("BTC-USD")
    }
}

/// Engine lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A background thread could not be spawned
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The first snapshot did not arrive within the configured window
    #[error("first snapshot not applied within {0:?}")]
    InitTimeout(Duration),
}

/// Lifecycle states, in order. `Starting -> Running` happens when the
/// init barrier is satisfied; `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Threads spawned, waiting for the first snapshot
    Starting = 0,
    /// Book initialized, mirror live
    Running = 1,
    /// Shutdown sequence in progress
    Stopping = 2,
    /// Both threads joined; no further mutation possible
    Stopped = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Starting,
            1 => EngineState::Running,
            2 => EngineState::Stopping,
            _ => EngineState::Stopped,
        }
    }
}

/// A running order-book mirror: one product, one feed thread, one
/// applier thread, any number of readers.
pub struct Engine {
    product: String,
    book: Arc<Book>,
    state: AtomicU8,
    depth: DepthProbe,
    stop_tx: watch::Sender<bool>,
    applier_stop: Arc<AtomicBool>,
    feed_thread: Option<JoinHandle<()>>,
    applier_thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Connect to the live feed and block until the book is queryable
    /// (the first snapshot has been fully applied).
    pub fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        let feed = CoinbaseFeed::new(
            config.product.as_str(),
            config.endpoint.as_str(),
            config.reconnect,
        );
        Self::with_feed(config, feed)
    }

    /// Like [`connect`](Self::connect), with a caller-supplied source.
    /// This is the entry point for tests and offline tooling.
    pub fn with_feed(config: EngineConfig, feed: impl FeedSource) -> Result<Self, EngineError> {
        info!(product = %config.product, "starting order book mirror");

        let book = Arc::new(Book::new());
        let (producer, consumer) = queue::unbounded(config.queue_warn_depth);
        let depth = consumer.depth_probe();
        let applier_stop = Arc::new(AtomicBool::new(false));

        let applier_thread = {
            let book = Arc::clone(&book);
            let stop = Arc::clone(&applier_stop);
            let pin = config.pin_applier;
            thread::Builder::new()
                .name("book-applier".into())
                .spawn(move || applier_loop(&book, &consumer, &stop, pin))?
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let feed_thread = {
            let feed = Box::new(feed);
            let signal = StopSignal::new(stop_rx);
            thread::Builder::new()
                .name("book-feed".into())
                .spawn(move || {
                    if let Err(err) = feed.run(producer, signal) {
                        error!(%err, "feed terminated with error");
                    }
                })?
        };

        let mut engine = Self {
            product: config.product,
            book,
            state: AtomicU8::new(EngineState::Starting as u8),
            depth,
            stop_tx,
            applier_stop,
            feed_thread: Some(feed_thread),
            applier_thread: Some(applier_thread),
        };

        if let Some(timeout) = config.init_timeout {
            if !engine.book.wait_ready_timeout(timeout) {
                engine.stop();
                return Err(EngineError::InitTimeout(timeout));
            }
        } else {
            engine.book.wait_ready();
        }

        engine.state.store(EngineState::Running as u8, Ordering::Release);
        info!(product = %engine.product, "book initialized, mirror running");
        Ok(engine)
    }

    // ========================================================================
    // Reader surface
    // ========================================================================

    /// The product this mirror tracks.
    pub fn product(&self) -> &str {
        &self.product
    }

    /// A shareable handle to the book for reader threads.
    pub fn book(&self) -> Arc<Book> {
        Arc::clone(&self.book)
    }

    /// Highest resting buy level.
    #[inline]
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.book.best_bid()
    }

    /// Lowest resting sell level.
    #[inline]
    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.book.best_ask()
    }

    /// Best-ask minus best-bid, in cents.
    #[inline]
    pub fn spread(&self) -> Option<u64> {
        self.book.spread()
    }

    /// Bid levels, best first.
    pub fn iter_bids(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.book.iter_bids()
    }

    /// Ask levels, best first.
    pub fn iter_asks(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.book.iter_asks()
    }

    /// Approximate update-queue depth (diagnostic).
    pub fn queue_depth(&self) -> usize {
        self.depth.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the mirror: signal the feed and join it (closing the queue's
    /// input side), then stop and join the applier. Records still queued
    /// are dropped, not drained. Idempotent; also runs on drop.
    pub fn stop(&mut self) {
        match self.state() {
            EngineState::Stopping | EngineState::Stopped => return,
            _ => {}
        }
        self.state.store(EngineState::Stopping as u8, Ordering::Release);

        debug!(product = %self.product, "stopping feed");
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.feed_thread.take() {
            let _ = handle.join();
        }

        // The producer is gone; the consumer can no longer block forever.
        self.applier_stop.store(true, Ordering::Release);
        if let Some(handle) = self.applier_thread.take() {
            let _ = handle.join();
        }

        self.state.store(EngineState::Stopped as u8, Ordering::Release);
        info!(product = %self.product, "mirror stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The applier loop: drain the queue in arrival order into the book,
/// parking (not spinning) while idle, until stopped or the producer
/// disconnects.
fn applier_loop(book: &Book, consumer: &UpdateConsumer, stop: &AtomicBool, pin: bool) {
    if pin {
        pin_to_core();
    }
    crate::register_thread();

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match consumer.dequeue_timeout(APPLIER_PARK) {
            Ok(record) => book.apply(record),
            Err(DequeueError::TimedOut) => {}
            Err(DequeueError::Disconnected) => break,
        }
    }

    let dropped = consumer.len();
    if dropped > 0 {
        debug!(dropped, "applier exiting with records still queued");
    }
}

/// Pin the current thread to the last available CPU core, which is the
/// one most often isolated from OS interrupts.
fn pin_to_core() {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(last_core) = core_ids.last() {
            core_affinity::set_for_current(*last_core);
        }
    }
}
