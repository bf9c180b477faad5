//! Update records and wire-message decoding.
//!
//! The feed hands the core decoded [`UpdateRecord`]s; this module owns
//! both the record types and the translation from the exchange's JSON
//! frames. Decoding is defensive: a malformed frame yields an error the
//! feed logs and skips, it never aborts the applier loop.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::price::{Price, Quantity};

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Map the feed's side token: `"buy"` is the bid side, any other
    /// token is the ask side.
    #[inline]
    pub fn from_token(token: &str) -> Self {
        if token == "buy" {
            Side::Bid
        } else {
            Side::Ask
        }
    }
}

/// A single level delta: the new absolute resting size at one price.
///
/// A quantity of exactly zero means the level is gone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelChange {
    /// Which side of the book changed
    pub side: Side,
    /// Price level that changed
    pub price: Price,
    /// New total size at this price (0 = level removed)
    pub qty: Quantity,
}

/// A decoded unit of work for the applier.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateRecord {
    /// Full book state for both sides, sent once after subscribing
    /// (and again by the exchange after a resubscribe).
    Snapshot {
        /// Bid levels, best first
        bids: Vec<(Price, Quantity)>,
        /// Ask levels, best first
        asks: Vec<(Price, Quantity)>,
    },
    /// A batch of level deltas, applied in the given order.
    Changes {
        /// Exchange timestamp of the batch, when present
        time: Option<DateTime<Utc>>,
        /// The deltas, in feed order
        changes: Vec<LevelChange>,
    },
}

/// Decode failures at the feed boundary.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame was not valid JSON for any known message shape
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// A price or size field was not a usable decimal
    #[error("bad decimal field {0:?}")]
    Decimal(String),
    /// The exchange reported an error message
    #[error("feed error: {0}")]
    Feed(String),
}

// ============================================================================
// Wire shapes
// ============================================================================

/// Inbound frame shapes on the level2 channel. Unrecognized types decode
/// to `Unknown` and are dropped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireMessage {
    Snapshot {
        bids: Vec<[String; 2]>,
        asks: Vec<[String; 2]>,
    },
    L2update {
        changes: Vec<[String; 3]>,
        #[serde(default)]
        time: Option<DateTime<Utc>>,
    },
    Subscriptions {},
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Parse a decimal price string to fixed-point cents.
///
/// Goes through `Decimal`, never `f64`; sub-cent digits round to the
/// nearest cent. Negative prices are rejected.
pub fn parse_price(s: &str) -> Result<Price, DecodeError> {
    let cents = Decimal::from_str(s)
        .ok()
        .map(|d| (d * Decimal::from(100u32)).round())
        .and_then(|d| d.to_u64())
        .ok_or_else(|| DecodeError::Decimal(s.to_string()))?;
    Ok(Price::from_cents(cents))
}

/// Parse a decimal size string. Negative sizes are rejected; zero is
/// valid (it is the deletion signal).
pub fn parse_size(s: &str) -> Result<Quantity, DecodeError> {
    let qty = Decimal::from_str(s)
        .ok()
        .filter(|d| !d.is_sign_negative())
        .and_then(|d| d.to_f64())
        .ok_or_else(|| DecodeError::Decimal(s.to_string()))?;
    Ok(qty)
}

fn parse_level([price, size]: &[String; 2]) -> Result<(Price, Quantity), DecodeError> {
    Ok((parse_price(price)?, parse_size(size)?))
}

fn parse_change([side, price, size]: &[String; 3]) -> Result<LevelChange, DecodeError> {
    Ok(LevelChange {
        side: Side::from_token(side),
        price: parse_price(price)?,
        qty: parse_size(size)?,
    })
}

/// Decode one text frame from the level2 channel.
///
/// Returns `Ok(None)` for frames that carry no book data (subscription
/// acks, unknown types). Returns `Err` for malformed frames and for
/// exchange-reported errors; the caller logs and skips those.
pub fn decode(text: &str) -> Result<Option<UpdateRecord>, DecodeError> {
    match serde_json::from_str::<WireMessage>(text)? {
        WireMessage::Snapshot { bids, asks } => {
            let bids = bids.iter().map(parse_level).collect::<Result<_, _>>()?;
            let asks = asks.iter().map(parse_level).collect::<Result<_, _>>()?;
            Ok(Some(UpdateRecord::Snapshot { bids, asks }))
        }
        WireMessage::L2update { changes, time } => {
            let changes = changes.iter().map(parse_change).collect::<Result<_, _>>()?;
            Ok(Some(UpdateRecord::Changes { time, changes }))
        }
        WireMessage::Error { message } => Err(DecodeError::Feed(message)),
        WireMessage::Subscriptions {} | WireMessage::Unknown => Ok(None),
    }
}
