//! Feed boundary - ingestion sources that produce update records.
//!
//! The core never runs an event loop of its own; a [`FeedSource`] owns
//! the transport (connect, subscribe, reconnect) and pushes decoded
//! records into the update queue from the dedicated ingestion thread.
//! [`CoinbaseFeed`] is the live WebSocket implementor; [`SyntheticFeed`]
//! drives the same pipeline offline for demos and stress runs.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::message::{self, LevelChange, Side, UpdateRecord};
use crate::price::Price;
use crate::queue::UpdateProducer;

/// Transport-level feed failures.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// WebSocket connect/read/write failure
    #[error("websocket transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// The ingestion thread could not build its runtime
    #[error("feed runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Cooperative stop signal handed to a running feed.
///
/// Synchronous feeds poll [`is_stopped`](Self::is_stopped) between
/// records; async feeds select on [`stopped`](Self::stopped).
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// True once the engine has requested a stop.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the engine requests a stop (or goes away).
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// An update-record source bound to one product.
///
/// `run` owns the ingestion thread for the engine's lifetime: it must
/// keep producing until the stop signal fires or the source is
/// exhausted, and must return promptly once stopped.
pub trait FeedSource: Send + 'static {
    /// Produce records into `updates` until stopped.
    fn run(self: Box<Self>, updates: UpdateProducer, stop: StopSignal) -> Result<(), FeedError>;
}

// ============================================================================
// Live WebSocket feed
// ============================================================================

/// Reconnect policy for the live feed: bounded attempts with a doubling
/// delay. A successful session resets the attempt count.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated before giving up
    pub attempts: u32,
    /// Delay before the first retry; doubles per consecutive failure
    pub initial_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

/// How a feed session ended, when it ended without a transport error.
enum SessionEnd {
    /// The stop signal fired
    Stopped,
    /// The server closed the connection
    Closed,
}

/// The exchange's level2 WebSocket channel for one product.
///
/// Subscribes once per connection; the exchange answers with a full
/// snapshot followed by incremental `l2update` batches. After a
/// reconnect the fresh snapshot resynchronizes the book (the init
/// barrier fires only for the first one).
pub struct CoinbaseFeed {
    product: String,
    endpoint: String,
    reconnect: ReconnectPolicy,
}

impl CoinbaseFeed {
    /// Create a feed for one product against the given wss endpoint.
    pub fn new(
        product: impl Into<String>,
        endpoint: impl Into<String>,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            product: product.into(),
            endpoint: endpoint.into(),
            reconnect,
        }
    }

    /// The subscription handshake, sent once per connection.
    fn subscribe_frame(&self) -> String {
        serde_json::json!({
            "type": "subscribe",
            "product_ids": [self.product],
            "channels": ["level2"],
        })
        .to_string()
    }

    async fn run_inner(
        self,
        updates: UpdateProducer,
        mut stop: StopSignal,
    ) -> Result<(), FeedError> {
        let mut attempt = 0u32;
        let mut delay = self.reconnect.initial_delay;

        loop {
            if stop.is_stopped() {
                return Ok(());
            }
            match self.session(&updates, &mut stop).await {
                Ok(SessionEnd::Stopped) => return Ok(()),
                Ok(SessionEnd::Closed) => {
                    attempt = 0;
                    delay = self.reconnect.initial_delay;
                    warn!(product = %self.product, "feed closed by server, reconnecting");
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > self.reconnect.attempts {
                        error!(%err, attempt, "feed giving up");
                        return Err(err);
                    }
                    warn!(%err, attempt, ?delay, "feed error, will reconnect");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.stopped() => return Ok(()),
            }
            delay = delay.saturating_mul(2);
        }
    }

    /// One connect-subscribe-stream session.
    async fn session(
        &self,
        updates: &UpdateProducer,
        stop: &mut StopSignal,
    ) -> Result<SessionEnd, FeedError> {
        let (ws, _) = connect_async(self.endpoint.as_str()).await?;
        let (mut write, mut read) = ws.split();

        write.send(Message::Text(self.subscribe_frame())).await?;
        info!(product = %self.product, endpoint = %self.endpoint, "subscribed to level2 feed");

        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Stopped);
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match message::decode(&text) {
                        Ok(Some(record)) => updates.enqueue(record),
                        Ok(None) => {}
                        // Malformed or error frames are skipped, never fatal.
                        Err(err) => warn!(%err, "skipping feed message"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("feed connection closed");
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                }
            }
        }
    }
}

impl FeedSource for CoinbaseFeed {
    fn run(self: Box<Self>, updates: UpdateProducer, stop: StopSignal) -> Result<(), FeedError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run_inner(updates, stop))
    }
}

// ============================================================================
// Synthetic feed (demos, stress runs)
// ============================================================================

/// A deterministic random-walk feed: one snapshot, then change batches
/// until stopped.
///
/// Prices walk a 5-cent grid around a drifting mid; sizes are always
/// `k * 0.5` for `k` in `1..=9`, so a consumer can recognize any value
/// it observes as validly produced. Roughly a quarter of the changes
/// are deletions.
pub struct SyntheticFeed {
    rng: u64,
    /// Mid price the walk is centered on, in cents
    pub mid_cents: u64,
    /// Levels per side in the initial snapshot
    pub snapshot_depth: usize,
    /// Changes per l2update batch
    pub batch_size: usize,
    /// Pause between batches; `None` floods as fast as the queue accepts
    pub throttle: Option<Duration>,
}

impl SyntheticFeed {
    /// Create a feed with the given PRNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: seed | 1,
            mid_cents: 300_000, // $3,000.00
            snapshot_depth: 50,
            batch_size: 16,
            throttle: Some(Duration::from_micros(50)),
        }
    }

    // Same LCG as the demo tooling; low bits are poor, use the high half.
    fn next(&mut self) -> u64 {
        self.rng = self
            .rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        self.rng >> 32
    }

    fn qty(r: u64) -> f64 {
        (r % 9 + 1) as f64 * 0.5
    }

    fn snapshot(&mut self) -> UpdateRecord {
        let mut bids = Vec::with_capacity(self.snapshot_depth);
        let mut asks = Vec::with_capacity(self.snapshot_depth);
        for i in 0..self.snapshot_depth as u64 {
            let r = self.next();
            bids.push((
                Price::from_cents(self.mid_cents - 5 * (i + 1)),
                Self::qty(r),
            ));
            let r = self.next();
            asks.push((
                Price::from_cents(self.mid_cents + 5 * (i + 1)),
                Self::qty(r),
            ));
        }
        UpdateRecord::Snapshot { bids, asks }
    }

    fn batch(&mut self) -> UpdateRecord {
        let mut changes = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            let r = self.next();
            // Occasional drift keeps the walk alive.
            if r % 97 == 0 {
                let drift = (r % 11) as i64 - 5;
                self.mid_cents = (self.mid_cents as i64 + 5 * drift).max(1_000) as u64;
            }
            let side = if r % 2 == 0 { Side::Bid } else { Side::Ask };
            let offset = 5 * (r % (self.snapshot_depth as u64) + 1);
            let price = match side {
                Side::Bid => Price::from_cents(self.mid_cents - offset),
                Side::Ask => Price::from_cents(self.mid_cents + offset),
            };
            let qty = if r % 4 == 0 { 0.0 } else { Self::qty(r) };
            changes.push(LevelChange { side, price, qty });
        }
        UpdateRecord::Changes {
            time: None,
            changes,
        }
    }
}

impl FeedSource for SyntheticFeed {
    fn run(
        mut self: Box<Self>,
        updates: UpdateProducer,
        stop: StopSignal,
    ) -> Result<(), FeedError> {
        updates.enqueue(self.snapshot());
        while !stop.is_stopped() {
            let record = self.batch();
            updates.enqueue(record);
            if let Some(pause) = self.throttle {
                std::thread::sleep(pause);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;

    #[test]
    fn test_subscribe_frame_shape() {
        let feed = CoinbaseFeed::new("BTC-USD", "wss://example", ReconnectPolicy::default());
        let frame: serde_json::Value = serde_json::from_str(&feed.subscribe_frame()).unwrap();
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["product_ids"][0], "BTC-USD");
        assert_eq!(frame["channels"][0], "level2");
    }

    #[test]
    fn test_synthetic_feed_starts_with_snapshot() {
        let (producer, consumer) = queue::unbounded(queue::DEFAULT_WARN_DEPTH);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap(); // stop immediately after the snapshot

        Box::new(SyntheticFeed::new(42))
            .run(producer, StopSignal::new(rx))
            .unwrap();

        match consumer.try_dequeue() {
            Some(UpdateRecord::Snapshot { bids, asks }) => {
                assert_eq!(bids.len(), 50);
                assert_eq!(asks.len(), 50);
                // Snapshot lists are best-first on both sides.
                assert!(bids.windows(2).all(|w| w[0].0 > w[1].0));
                assert!(asks.windows(2).all(|w| w[0].0 < w[1].0));
            }
            other => panic!("expected snapshot first, got {other:?}"),
        }
    }

    #[test]
    fn test_synthetic_feed_is_deterministic() {
        let mut a = SyntheticFeed::new(7);
        let mut b = SyntheticFeed::new(7);
        assert_eq!(a.snapshot(), b.snapshot());
        for _ in 0..10 {
            assert_eq!(a.batch(), b.batch());
        }
    }

    #[test]
    fn test_synthetic_sizes_are_recognizable() {
        let mut feed = SyntheticFeed::new(1234);
        let _ = feed.snapshot();
        for _ in 0..100 {
            if let UpdateRecord::Changes { changes, .. } = feed.batch() {
                for change in changes {
                    let doubled = change.qty * 2.0;
                    assert_eq!(doubled.fract(), 0.0);
                    assert!((0.0..=9.0).contains(&doubled));
                }
            }
        }
    }
}
