//! Historical and real-time market-data access for crypto exchanges.
//!
//! The historical side replays minute-sliced, gzip-compressed capture files:
//! a background worker prefetches slices from the remote archive into an
//! on-disk cache while the consumer walks the requested range in strict
//! chronological order. The live side wraps a [`RealTimeFeed`], stamping
//! messages with their arrival time. Both sources share one normalization
//! pipeline driven by pluggable [`Mapper`] chains.

mod cache;
mod client;
mod config;
mod error;
mod exchange;
mod fetch;
mod lines;
mod live;
mod mappers;
mod message;
mod normalize;
mod replay;
mod slice;

pub use cache::cached_slice_path;
pub use client::{ApiKeyAccessInfo, ExchangeDetails, SymbolDetails, TapeClient};
pub use config::TapeConfig;
pub use error::{TapeError, TapeResult};
pub use exchange::{Exchange, Filter, ALL_EXCHANGES};
pub use live::{
    FeedEvent, RealTimeFeed, StreamNormalizedOptions, StreamOptions, DEFAULT_TIMEOUT_INTERVAL_MS,
};
pub use mappers::{BitmexTradesMapper, CoinbaseMapper};
pub use message::{
    BookChange, BookLevel, NormalizedMessage, RawReplayMessage, ReplayItem, ReplayMessage, Trade,
    TradeSide,
};
pub use normalize::{Mapper, MapperFactory};
pub use replay::{ReplayNormalizedOptions, ReplayOptions, ReplayStream};
pub use slice::{minute_floor, slice_key};
