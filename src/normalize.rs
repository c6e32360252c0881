use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{TapeError, TapeResult};
use crate::exchange::{Exchange, Filter};
use crate::message::{NormalizedMessage, ReplayItem};
use crate::slice::parse_local_timestamp;

/// A unit that recognizes a subset of a venue's raw payloads and emits
/// normalized messages. Mappers may be stateful (book snapshots etc.);
/// state is discarded and rebuilt after every disconnect.
pub trait Mapper: Send {
    fn can_handle(&self, payload: &Value) -> bool;

    fn map(
        &mut self,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Option<Vec<NormalizedMessage>>;

    /// Capture filters this mapper needs to see its payloads. Symbols are
    /// already upper-cased by the adapter.
    fn filters(&self, symbols: &[String]) -> Vec<Filter>;
}

/// Creates fresh mapper state; invoked again after every disconnect.
pub type MapperFactory = Box<dyn Fn() -> Box<dyn Mapper> + Send + Sync>;

/// Union of the capture filters required by a mapper chain.
pub(crate) fn filters_for(factories: &[MapperFactory], symbols: &[String]) -> Vec<Filter> {
    let mut filters = Vec::new();
    for factory in factories {
        filters.extend(factory().filters(symbols));
    }
    filters
}

pub(crate) fn uppercase(symbols: Option<Vec<String>>) -> Vec<String> {
    symbols
        .unwrap_or_default()
        .into_iter()
        .map(|symbol| symbol.to_uppercase())
        .collect()
}

struct NormalizeState {
    source: BoxStream<'static, TapeResult<ReplayItem>>,
    exchange: Exchange,
    factories: Vec<MapperFactory>,
    mappers: Vec<Box<dyn Mapper>>,
    symbols: Vec<String>,
    with_disconnect_messages: bool,
    pending: VecDeque<NormalizedMessage>,
    last_seen: Option<DateTime<Utc>>,
    done: bool,
}

/// Run a raw item source through a mapper chain.
///
/// The source must deliver explicit disconnect items; they reset every
/// mapper and, when enabled and at least one message was observed, surface
/// as [`NormalizedMessage::Disconnect`] carrying the last seen capture time.
pub(crate) fn normalize(
    exchange: Exchange,
    source: BoxStream<'static, TapeResult<ReplayItem>>,
    factories: Vec<MapperFactory>,
    symbols: Vec<String>,
    with_disconnect_messages: bool,
) -> TapeResult<impl Stream<Item = TapeResult<NormalizedMessage>> + Send> {
    if factories.is_empty() {
        return Err(TapeError::Configuration(
            "at least one mapper is required".to_string(),
        ));
    }
    let mappers = factories.iter().map(|factory| factory()).collect();
    let state = NormalizeState {
        source,
        exchange,
        factories,
        mappers,
        symbols,
        with_disconnect_messages,
        pending: VecDeque::new(),
        last_seen: None,
        done: false,
    };
    Ok(stream::unfold(state, |mut state| async move {
        match state.next_message().await {
            Ok(Some(message)) => Some((Ok(message), state)),
            Ok(None) => None,
            Err(err) => {
                state.done = true;
                Some((Err(err), state))
            }
        }
    }))
}

impl NormalizeState {
    async fn next_message(&mut self) -> TapeResult<Option<NormalizedMessage>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            let Some(item) = self.source.next().await else {
                return Ok(None);
            };
            match item? {
                ReplayItem::Disconnect => {
                    self.mappers = self.factories.iter().map(|factory| factory()).collect();
                    if self.with_disconnect_messages {
                        if let Some(local_timestamp) = self.last_seen {
                            self.pending.push_back(NormalizedMessage::Disconnect {
                                exchange: self.exchange,
                                local_timestamp,
                            });
                        }
                    }
                }
                ReplayItem::Message(message) => {
                    self.apply(&message.payload, message.local_timestamp);
                }
                ReplayItem::Raw(raw) => {
                    let local_timestamp = parse_local_timestamp(&raw.local_timestamp)?;
                    let payload: Value = serde_json::from_slice(&raw.payload)?;
                    self.apply(&payload, local_timestamp);
                }
            }
        }
    }

    fn apply(&mut self, payload: &Value, local_timestamp: DateTime<Utc>) {
        self.last_seen = Some(local_timestamp);
        let mut produced = Vec::new();
        for mapper in &mut self.mappers {
            if !mapper.can_handle(payload) {
                continue;
            }
            let Some(messages) = mapper.map(payload, local_timestamp) else {
                continue;
            };
            produced.extend(messages);
        }
        for message in produced {
            if self.keeps(&message) {
                self.pending.push_back(message);
            }
        }
    }

    /// Empty symbol list passes everything; messages without a symbol
    /// (disconnects) always pass.
    fn keeps(&self, message: &NormalizedMessage) -> bool {
        if self.symbols.is_empty() {
            return true;
        }
        match message.symbol() {
            Some(symbol) => self.symbols.iter().any(|wanted| wanted == symbol),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ReplayMessage, Trade, TradeSide};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoMapper {
        instance: usize,
    }

    impl Mapper for EchoMapper {
        fn can_handle(&self, payload: &Value) -> bool {
            payload.get("kind").and_then(Value::as_str) == Some("trade")
        }

        fn map(
            &mut self,
            payload: &Value,
            local_timestamp: DateTime<Utc>,
        ) -> Option<Vec<NormalizedMessage>> {
            let symbol = payload.get("symbol")?.as_str()?.to_string();
            Some(vec![NormalizedMessage::Trade(Trade {
                symbol,
                exchange: Exchange::Bitmex,
                price: Decimal::new(self.instance as i64, 0),
                amount: Decimal::ONE,
                side: TradeSide::Buy,
                timestamp: local_timestamp,
                local_timestamp,
            })])
        }

        fn filters(&self, symbols: &[String]) -> Vec<Filter> {
            vec![Filter {
                channel: "trade".to_string(),
                symbols: (!symbols.is_empty()).then(|| symbols.to_vec()),
            }]
        }
    }

    fn counting_factory(counter: Arc<AtomicUsize>) -> MapperFactory {
        Box::new(move || {
            let instance = counter.fetch_add(1, Ordering::SeqCst);
            Box::new(EchoMapper { instance })
        })
    }

    fn message(symbol: &str, minute: u32) -> TapeResult<ReplayItem> {
        let local_timestamp = Utc.with_ymd_and_hms(2020, 3, 1, 0, minute, 0).unwrap();
        Ok(ReplayItem::Message(ReplayMessage {
            local_timestamp,
            payload: serde_json::json!({ "kind": "trade", "symbol": symbol }),
        }))
    }

    async fn run(
        items: Vec<TapeResult<ReplayItem>>,
        symbols: Vec<String>,
        with_disconnect_messages: bool,
        counter: Arc<AtomicUsize>,
    ) -> Vec<NormalizedMessage> {
        let source = stream::iter(items).boxed();
        let factories = vec![counting_factory(counter)];
        let normalized = normalize(
            Exchange::Bitmex,
            source,
            factories,
            symbols,
            with_disconnect_messages,
        )
        .unwrap();
        normalized
            .map(|message| message.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn requires_at_least_one_mapper() {
        let source = stream::iter(Vec::<TapeResult<ReplayItem>>::new()).boxed();
        let err = normalize(Exchange::Bitmex, source, Vec::new(), Vec::new(), false)
            .err()
            .unwrap();
        assert!(matches!(err, TapeError::Configuration(_)));
    }

    #[tokio::test]
    async fn filters_by_symbol() {
        let items = vec![message("BTC-USD", 0), message("ETH-USD", 1)];
        let counter = Arc::new(AtomicUsize::new(0));
        let out = run(items, vec!["BTC-USD".to_string()], false, counter).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].symbol(), Some("BTC-USD"));
    }

    #[tokio::test]
    async fn empty_symbol_list_passes_everything() {
        let items = vec![message("BTC-USD", 0), message("ETH-USD", 1)];
        let counter = Arc::new(AtomicUsize::new(0));
        let out = run(items, Vec::new(), false, counter).await;
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn disconnect_rebuilds_mappers_and_surfaces_when_enabled() {
        let items = vec![
            message("BTC-USD", 0),
            Ok(ReplayItem::Disconnect),
            message("BTC-USD", 2),
        ];
        let counter = Arc::new(AtomicUsize::new(0));
        let out = run(items, Vec::new(), true, Arc::clone(&counter)).await;

        // one instance up front, one rebuilt after the disconnect
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(out.len(), 3);
        let NormalizedMessage::Trade(before) = &out[0] else {
            panic!("expected trade");
        };
        let NormalizedMessage::Disconnect {
            local_timestamp, ..
        } = &out[1]
        else {
            panic!("expected disconnect");
        };
        let NormalizedMessage::Trade(after) = &out[2] else {
            panic!("expected trade");
        };
        // the disconnect message carries the last seen capture time
        assert_eq!(*local_timestamp, before.local_timestamp);
        // the trades straddling the disconnect came from distinct instances
        assert_ne!(before.price, after.price);
    }

    #[tokio::test]
    async fn leading_disconnect_is_not_surfaced() {
        let items = vec![Ok(ReplayItem::Disconnect), message("BTC-USD", 1)];
        let counter = Arc::new(AtomicUsize::new(0));
        let out = run(items, Vec::new(), true, counter).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], NormalizedMessage::Trade(_)));
    }

    #[test]
    fn uppercases_symbols() {
        assert_eq!(
            uppercase(Some(vec!["btc-usd".to_string(), "Eth-Usd".to_string()])),
            vec!["BTC-USD".to_string(), "ETH-USD".to_string()]
        );
        assert!(uppercase(None).is_empty());
    }
}
