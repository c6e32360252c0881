use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;

use crate::config::TapeConfig;
use crate::error::{TapeError, TapeResult};
use crate::exchange::Exchange;
use crate::fetch::truncate;
use crate::live::{self, RealTimeFeed, StreamNormalizedOptions, StreamOptions};
use crate::message::{NormalizedMessage, ReplayItem};
use crate::normalize::{filters_for, normalize, uppercase, MapperFactory};
use crate::replay::{
    validate_filters, validate_replay, ReplayNormalizedOptions, ReplayOptions, ReplayStream,
};

/// Venue metadata returned by the remote API.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeDetails {
    pub id: String,
    #[serde(default)]
    pub available_channels: Vec<String>,
    #[serde(default)]
    pub available_symbols: Vec<SymbolDetails>,
    pub available_since: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDetails {
    pub id: String,
    #[serde(rename = "type")]
    pub symbol_type: Option<String>,
    pub available_since: Option<DateTime<Utc>>,
}

/// Per-exchange access window granted to an API key.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyAccessInfo {
    pub exchange: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Entry point for historical replay, live streaming, and venue metadata.
pub struct TapeClient {
    config: TapeConfig,
    http: reqwest::Client,
}

impl TapeClient {
    pub fn new(config: TapeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &TapeConfig {
        &self.config
    }

    /// Replay a historical range as a chronologically ordered stream of raw
    /// items. Must be called from within a tokio runtime; the prefetch
    /// worker is spawned immediately. Dropping the stream cancels the worker
    /// on a best-effort basis; [`ReplayStream::shutdown`] waits for it.
    pub fn replay(&self, options: ReplayOptions) -> TapeResult<ReplayStream> {
        let validated = validate_replay(&options)?;
        Ok(ReplayStream::launch(self.http.clone(), &self.config, validated))
    }

    /// Replay a historical range through a mapper chain.
    pub fn replay_normalized(
        &self,
        options: ReplayNormalizedOptions,
        factories: Vec<MapperFactory>,
    ) -> TapeResult<BoxStream<'static, TapeResult<NormalizedMessage>>> {
        if factories.is_empty() {
            return Err(TapeError::Configuration(
                "at least one mapper is required".to_string(),
            ));
        }
        let exchange: Exchange = options.exchange.parse()?;
        let symbols = uppercase(options.symbols);
        let filters = if exchange.supports_filtering() {
            filters_for(&factories, &symbols)
        } else {
            Vec::new()
        };
        let replay_options = ReplayOptions::new(options.exchange, options.from, options.to)
            .with_filters(filters)
            .with_disconnect_markers(true);
        let source = self.replay(replay_options)?.boxed();
        let normalized = normalize(
            exchange,
            source,
            factories,
            symbols,
            options.with_disconnect_messages,
        )?;
        Ok(normalized.boxed())
    }

    /// Stream live raw messages from a real-time feed, stamped with their
    /// local arrival time.
    pub fn stream(
        &self,
        options: StreamOptions,
        feed: impl RealTimeFeed + 'static,
    ) -> TapeResult<BoxStream<'static, TapeResult<ReplayItem>>> {
        live::validate_stream(&options)?;
        let items = live::stamped(feed, options.filters, options.timeout_interval_ms);
        if options.with_disconnect_markers {
            Ok(items)
        } else {
            Ok(items
                .filter(|item| {
                    futures::future::ready(!matches!(item, Ok(ReplayItem::Disconnect)))
                })
                .boxed())
        }
    }

    /// Stream live messages through a mapper chain.
    pub fn stream_normalized(
        &self,
        options: StreamNormalizedOptions,
        feed: impl RealTimeFeed + 'static,
        factories: Vec<MapperFactory>,
    ) -> TapeResult<BoxStream<'static, TapeResult<NormalizedMessage>>> {
        if factories.is_empty() {
            return Err(TapeError::Configuration(
                "at least one mapper is required".to_string(),
            ));
        }
        let exchange: Exchange = options.exchange.parse()?;
        let symbols = uppercase(options.symbols);
        let filters = filters_for(&factories, &symbols);
        validate_filters(exchange, &filters)?;
        let items = live::stamped(feed, filters, options.timeout_interval_ms);
        let normalized = normalize(
            exchange,
            items,
            factories,
            symbols,
            options.with_disconnect_messages,
        )?;
        Ok(normalized.boxed())
    }

    /// Fetch venue metadata from the remote API.
    pub async fn exchange_details(&self, exchange: Exchange) -> TapeResult<ExchangeDetails> {
        let url = format!("{}/v1/exchanges/{exchange}", self.config.endpoint);
        self.get_json(&url, false).await
    }

    /// Fetch the access windows granted to the configured API key.
    pub async fn api_key_access_info(&self) -> TapeResult<Vec<ApiKeyAccessInfo>> {
        let url = format!("{}/v1/api-key-info", self.config.endpoint);
        self.get_json(&url, true).await
    }

    /// Delete the on-disk slice cache.
    pub async fn clear_cache(&self) {
        self.config.clear_cache().await;
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        authorized: bool,
    ) -> TapeResult<T> {
        let mut request = self.http.get(url);
        if authorized {
            if let Some(api_key) = &self.config.api_key {
                request = request.bearer_auth(api_key);
            }
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TapeError::Fetch(format!(
                "{url} responded with status {status}: {}",
                truncate(&body, 256)
            )));
        }
        serde_json::from_str(&body).map_err(|err| {
            TapeError::Decode(format!(
                "failed to parse response from {url}: {err} (body snippet: {})",
                truncate(&body, 256)
            ))
        })
    }
}
