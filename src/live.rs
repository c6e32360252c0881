use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;

use crate::error::{TapeError, TapeResult};
use crate::exchange::{Exchange, Filter};
use crate::message::{ReplayItem, ReplayMessage};
use crate::replay::validate_filters;

/// Default silence window before a feed is considered disconnected.
pub const DEFAULT_TIMEOUT_INTERVAL_MS: u64 = 10_000;

/// One event from a real-time feed.
#[derive(Debug)]
pub enum FeedEvent {
    Message(Value),
    /// The upstream connection dropped; the feed reconnects on its own.
    Disconnect,
}

/// Real-time message source, typically WebSocket-backed.
///
/// Implementations own their reconnect policy; the adapter only stamps
/// arrival times and coalesces the disconnect markers they emit.
pub trait RealTimeFeed: Send {
    /// Silence window in milliseconds after which the feed must emit a
    /// disconnect marker and reconnect. Zero disables the timeout.
    fn set_timeout_interval(&mut self, millis: u64);

    /// Open the feed for the given capture filters.
    fn stream(&mut self, filters: Vec<Filter>) -> BoxStream<'static, TapeResult<FeedEvent>>;
}

/// Live request mirroring the replay surface.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub exchange: String,
    pub filters: Vec<Filter>,
    pub timeout_interval_ms: u64,
    pub with_disconnect_markers: bool,
}

impl StreamOptions {
    pub fn new(exchange: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            exchange: exchange.into(),
            filters,
            timeout_interval_ms: DEFAULT_TIMEOUT_INTERVAL_MS,
            with_disconnect_markers: false,
        }
    }

    #[must_use]
    pub fn with_timeout_interval(mut self, millis: u64) -> Self {
        self.timeout_interval_ms = millis;
        self
    }

    #[must_use]
    pub fn with_disconnect_markers(mut self, enabled: bool) -> Self {
        self.with_disconnect_markers = enabled;
        self
    }
}

/// Live request for the normalized surface.
#[derive(Clone, Debug)]
pub struct StreamNormalizedOptions {
    pub exchange: String,
    pub symbols: Option<Vec<String>>,
    pub timeout_interval_ms: u64,
    pub with_disconnect_messages: bool,
}

impl StreamNormalizedOptions {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbols: None,
            timeout_interval_ms: DEFAULT_TIMEOUT_INTERVAL_MS,
            with_disconnect_messages: false,
        }
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    #[must_use]
    pub fn with_timeout_interval(mut self, millis: u64) -> Self {
        self.timeout_interval_ms = millis;
        self
    }

    #[must_use]
    pub fn with_disconnect_messages(mut self, enabled: bool) -> Self {
        self.with_disconnect_messages = enabled;
        self
    }
}

pub(crate) fn validate_stream(options: &StreamOptions) -> TapeResult<Exchange> {
    let exchange: Exchange = options.exchange.parse()?;
    if options.filters.is_empty() {
        return Err(TapeError::InvalidOptions(
            "filters must not be empty".to_string(),
        ));
    }
    validate_filters(exchange, &options.filters)?;
    Ok(exchange)
}

/// Stamp feed events with their local arrival time and coalesce
/// consecutive disconnect markers.
pub(crate) fn stamped(
    mut feed: impl RealTimeFeed + 'static,
    filters: Vec<Filter>,
    timeout_interval_ms: u64,
) -> BoxStream<'static, TapeResult<ReplayItem>> {
    feed.set_timeout_interval(timeout_interval_ms);
    let events = feed.stream(filters);
    stream::unfold(
        (events, false),
        |(mut events, mut last_was_disconnect)| async move {
            loop {
                match events.next().await {
                    None => return None,
                    Some(Err(err)) => return Some((Err(err), (events, last_was_disconnect))),
                    Some(Ok(FeedEvent::Message(payload))) => {
                        last_was_disconnect = false;
                        let item = ReplayItem::Message(ReplayMessage {
                            local_timestamp: Utc::now(),
                            payload,
                        });
                        return Some((Ok(item), (events, last_was_disconnect)));
                    }
                    Some(Ok(FeedEvent::Disconnect)) => {
                        if !last_was_disconnect {
                            last_was_disconnect = true;
                            return Some((Ok(ReplayItem::Disconnect), (events, last_was_disconnect)));
                        }
                    }
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedFeed {
        events: Vec<TapeResult<FeedEvent>>,
        timeout: Option<u64>,
    }

    impl RealTimeFeed for ScriptedFeed {
        fn set_timeout_interval(&mut self, millis: u64) {
            self.timeout = Some(millis);
        }

        fn stream(&mut self, _filters: Vec<Filter>) -> BoxStream<'static, TapeResult<FeedEvent>> {
            stream::iter(std::mem::take(&mut self.events)).boxed()
        }
    }

    #[tokio::test]
    async fn stamps_messages_and_coalesces_disconnects() {
        let feed = ScriptedFeed {
            events: vec![
                Ok(FeedEvent::Message(serde_json::json!({"seq": 1}))),
                Ok(FeedEvent::Disconnect),
                Ok(FeedEvent::Disconnect),
                Ok(FeedEvent::Message(serde_json::json!({"seq": 2}))),
            ],
            timeout: None,
        };
        let before = Utc::now();
        let items: Vec<_> = stamped(feed, vec![Filter::channel("trade")], 500)
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        let ReplayItem::Message(first) = &items[0] else {
            panic!("expected message");
        };
        assert!(first.local_timestamp >= before);
        assert!(matches!(items[1], ReplayItem::Disconnect));
        assert!(matches!(items[2], ReplayItem::Message(_)));
    }

    #[tokio::test]
    async fn applies_the_requested_timeout() {
        let mut feed = ScriptedFeed {
            events: Vec::new(),
            timeout: None,
        };
        feed.set_timeout_interval(0);
        assert_eq!(feed.timeout, Some(0));

        let feed = ScriptedFeed {
            events: Vec::new(),
            timeout: None,
        };
        let items: Vec<_> = stamped(feed, vec![Filter::channel("trade")], 250)
            .collect()
            .await;
        assert!(items.is_empty());
    }

    #[test]
    fn stream_validation_requires_filters_and_known_channels() {
        let err = validate_stream(&StreamOptions::new("bitmex", Vec::new())).unwrap_err();
        assert!(err.to_string().contains("filters"));

        let err = validate_stream(&StreamOptions::new(
            "bitmex",
            vec![Filter::channel("nope")],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("\"nope\""));

        let exchange = validate_stream(&StreamOptions::new(
            "bitmex",
            vec![Filter::channel("trade")],
        ))
        .unwrap();
        assert_eq!(exchange, Exchange::Bitmex);
    }
}
