use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TapeError;

/// Supported trading venues.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Exchange {
    Bitmex,
    Deribit,
    Binance,
    BinanceFutures,
    Bitfinex,
    BitfinexDerivatives,
    Coinbase,
    Kraken,
    Huobi,
    Okex,
    Bitstamp,
}

/// The full venue catalog, in wire-id order.
pub const ALL_EXCHANGES: [Exchange; 11] = [
    Exchange::Bitmex,
    Exchange::Deribit,
    Exchange::Binance,
    Exchange::BinanceFutures,
    Exchange::Bitfinex,
    Exchange::BitfinexDerivatives,
    Exchange::Coinbase,
    Exchange::Kraken,
    Exchange::Huobi,
    Exchange::Okex,
    Exchange::Bitstamp,
];

impl Exchange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bitmex => "bitmex",
            Self::Deribit => "deribit",
            Self::Binance => "binance",
            Self::BinanceFutures => "binance-futures",
            Self::Bitfinex => "bitfinex",
            Self::BitfinexDerivatives => "bitfinex-derivatives",
            Self::Coinbase => "coinbase",
            Self::Kraken => "kraken",
            Self::Huobi => "huobi",
            Self::Okex => "okex",
            Self::Bitstamp => "bitstamp",
        }
    }

    /// Channels the venue's capture feed publishes.
    pub fn channels(self) -> &'static [&'static str] {
        match self {
            Self::Bitmex => &[
                "trade",
                "orderBookL2",
                "quote",
                "instrument",
                "liquidation",
                "settlement",
            ],
            Self::Deribit => &["trades", "book", "ticker", "quote", "perpetual"],
            Self::Binance => &[
                "trade",
                "aggTrade",
                "depth",
                "depthSnapshot",
                "bookTicker",
                "ticker",
            ],
            Self::BinanceFutures => &[
                "trade",
                "aggTrade",
                "depth",
                "depthSnapshot",
                "bookTicker",
                "markPrice",
            ],
            Self::Bitfinex => &["trades", "book"],
            Self::BitfinexDerivatives => &["trades", "book", "status"],
            Self::Coinbase => &["match", "l2update", "snapshot", "ticker", "received"],
            Self::Kraken => &["trade", "book", "ticker", "spread"],
            Self::Huobi => &["trade", "depth", "bbo", "kline"],
            Self::Okex => &["trade", "depth", "ticker", "funding-rate"],
            Self::Bitstamp => &["live_trades", "live_orders", "diff_order_book"],
        }
    }

    /// Whether the venue's capture feed can be narrowed server-side.
    /// Bitfinex captures are whole-channel only.
    pub fn supports_filtering(self) -> bool {
        !matches!(self, Self::Bitfinex | Self::BitfinexDerivatives)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = TapeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_EXCHANGES
            .iter()
            .copied()
            .find(|exchange| exchange.as_str() == value)
            .ok_or_else(|| {
                let known = ALL_EXCHANGES
                    .iter()
                    .map(|exchange| exchange.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                TapeError::InvalidOptions(format!(
                    "unknown exchange {value:?}, expected one of: {known}"
                ))
            })
    }
}

/// Channel/symbol selector applied on the fetch side to narrow slice content.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Filter {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
}

impl Filter {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            symbols: None,
        }
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }
}
