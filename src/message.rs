use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::Exchange;

/// Decoded record from the tape: local capture time plus raw venue payload.
#[derive(Clone, Debug)]
pub struct ReplayMessage {
    pub local_timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Undecoded record: byte ranges exactly as stored on the tape.
#[derive(Clone, Debug)]
pub struct RawReplayMessage {
    pub local_timestamp: Bytes,
    pub payload: Bytes,
}

/// One item yielded by the replay and live streams.
#[derive(Clone, Debug)]
pub enum ReplayItem {
    Message(ReplayMessage),
    Raw(RawReplayMessage),
    /// The capture-side connection dropped at this point of the tape.
    Disconnect,
}

/// Aggressor side of a normalized trade.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

/// Cross-exchange trade.
#[derive(Clone, Debug, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub exchange: Exchange,
    pub price: Decimal,
    pub amount: Decimal,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
    pub local_timestamp: DateTime<Utc>,
}

/// Single price level of a book change.
#[derive(Clone, Debug, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Cross-exchange order book delta or snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct BookChange {
    pub symbol: String,
    pub exchange: Exchange,
    pub is_snapshot: bool,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
    pub local_timestamp: DateTime<Utc>,
}

/// Output of the normalization pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedMessage {
    Trade(Trade),
    BookChange(BookChange),
    Disconnect {
        exchange: Exchange,
        local_timestamp: DateTime<Utc>,
    },
}

impl NormalizedMessage {
    /// Symbol the message refers to, when it refers to one.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(trade) => Some(&trade.symbol),
            Self::BookChange(change) => Some(&change.symbol),
            Self::Disconnect { .. } => None,
        }
    }

    pub fn local_timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(trade) => trade.local_timestamp,
            Self::BookChange(change) => change.local_timestamp,
            Self::Disconnect {
                local_timestamp, ..
            } => *local_timestamp,
        }
    }
}
