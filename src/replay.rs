use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::SliceIndex;
use crate::config::TapeConfig;
use crate::error::{TapeError, TapeResult};
use crate::exchange::{Exchange, Filter};
use crate::fetch::FetchJob;
use crate::message::{RawReplayMessage, ReplayItem, ReplayMessage};
use crate::slice::{minute_floor, parse_local_timestamp, SliceLine, SliceReader};

/// Delay between index probes while a slice is still being fetched.
/// The wait never times out; slow downloads stall the consumer, not fail it.
const SLICE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Historical replay request. `from` is inclusive, `to` exclusive; both
/// accept `YYYY-MM-DD` dates or full RFC 3339 instants.
#[derive(Clone, Debug)]
pub struct ReplayOptions {
    pub exchange: String,
    pub from: String,
    pub to: String,
    pub filters: Vec<Filter>,
    pub skip_decoding: bool,
    pub with_disconnect_markers: bool,
}

impl ReplayOptions {
    pub fn new(
        exchange: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            from: from.into(),
            to: to.into(),
            filters: Vec::new(),
            skip_decoding: false,
            with_disconnect_markers: false,
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Yield raw timestamp and payload bytes exactly as cached, skipping
    /// JSON and timestamp decoding.
    #[must_use]
    pub fn with_skip_decoding(mut self, skip: bool) -> Self {
        self.skip_decoding = skip;
        self
    }

    /// Emit explicit [`ReplayItem::Disconnect`] markers where the capture
    /// side lost its connection. Consecutive markers are coalesced.
    #[must_use]
    pub fn with_disconnect_markers(mut self, enabled: bool) -> Self {
        self.with_disconnect_markers = enabled;
        self
    }
}

/// Historical replay request for the normalized surface.
#[derive(Clone, Debug)]
pub struct ReplayNormalizedOptions {
    pub exchange: String,
    pub from: String,
    pub to: String,
    pub symbols: Option<Vec<String>>,
    pub with_disconnect_messages: bool,
}

impl ReplayNormalizedOptions {
    pub fn new(
        exchange: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            from: from.into(),
            to: to.into(),
            symbols: None,
            with_disconnect_messages: false,
        }
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    #[must_use]
    pub fn with_disconnect_messages(mut self, enabled: bool) -> Self {
        self.with_disconnect_messages = enabled;
        self
    }
}

/// Validated form of [`ReplayOptions`].
#[derive(Debug)]
pub(crate) struct ValidatedReplay {
    pub exchange: Exchange,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub filters: Vec<Filter>,
    pub skip_decoding: bool,
    pub with_disconnect_markers: bool,
}

pub(crate) fn validate_replay(options: &ReplayOptions) -> TapeResult<ValidatedReplay> {
    let exchange: Exchange = options.exchange.parse()?;
    let from = parse_instant("from", &options.from)?;
    let to = parse_instant("to", &options.to)?;
    if to <= from {
        return Err(TapeError::InvalidOptions(format!(
            "to ({}) must be after from ({})",
            options.to, options.from
        )));
    }
    validate_filters(exchange, &options.filters)?;
    Ok(ValidatedReplay {
        exchange,
        from: minute_floor(from),
        to,
        filters: options.filters.clone(),
        skip_decoding: options.skip_decoding,
        with_disconnect_markers: options.with_disconnect_markers,
    })
}

pub(crate) fn validate_filters(exchange: Exchange, filters: &[Filter]) -> TapeResult<()> {
    for filter in filters {
        if !exchange.channels().contains(&filter.channel.as_str()) {
            return Err(TapeError::InvalidOptions(format!(
                "invalid channel {:?} for {exchange}, expected one of: {}",
                filter.channel,
                exchange.channels().join(", ")
            )));
        }
        if let Some(symbols) = &filter.symbols {
            if symbols.iter().any(|symbol| symbol.trim().is_empty()) {
                return Err(TapeError::InvalidOptions(format!(
                    "symbols for channel {:?} must be non-empty strings",
                    filter.channel
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn parse_instant(field: &'static str, value: &str) -> TapeResult<DateTime<Utc>> {
    if let Ok(instant) = value.parse::<DateTime<Utc>>() {
        return Ok(instant);
    }
    if let Ok(date) = value.parse::<NaiveDate>() {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
        }
    }
    Err(TapeError::InvalidOptions(format!(
        "{field} is not a valid UTC date or instant: {value:?}"
    )))
}

/// Stops the background fetch worker when the replay stream goes away.
/// Best effort only; [`ReplayStream::shutdown`] is the deterministic path.
struct WorkerGuard {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Chronologically ordered stream of replay items with its fetch worker
/// attached.
///
/// Dropping the stream cancels the worker without waiting for it. Callers
/// that need the cancellation acknowledged (no further cache-file writes
/// after control returns) use [`shutdown`](Self::shutdown).
pub struct ReplayStream {
    inner: BoxStream<'static, TapeResult<ReplayItem>>,
    worker: WorkerGuard,
}

impl ReplayStream {
    /// Spawn the fetch worker and set up the consuming side. Must be called
    /// from within a tokio runtime.
    pub(crate) fn launch(
        http: reqwest::Client,
        config: &TapeConfig,
        options: ValidatedReplay,
    ) -> Self {
        let index = Arc::new(SliceIndex::default());
        let cancel = CancellationToken::new();
        let job = FetchJob {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            cache_dir: config.cache_dir.clone(),
            exchange: options.exchange,
            filters: options.filters,
            from: options.from,
            to: options.to,
        };
        debug!(
            exchange = options.exchange.as_str(),
            from = %options.from,
            to = %options.to,
            "replay started"
        );
        let handle = tokio::spawn(job.run(Arc::clone(&index), cancel.clone()));
        let driver = ReplayDriver {
            index,
            current: options.from,
            end: options.to,
            open: None,
            skip_decoding: options.skip_decoding,
            with_disconnect_markers: options.with_disconnect_markers,
            last_was_disconnect: false,
            done: false,
        };
        Self {
            inner: driver.into_stream().boxed(),
            worker: WorkerGuard {
                cancel,
                handle: Some(handle),
            },
        }
    }

    /// Cancel the fetch worker and wait until it has exited. Cancellation
    /// is cooperative: the worker stops at its next completion point and
    /// writes no further cache files once this returns.
    pub async fn shutdown(mut self) {
        self.worker.cancel.cancel();
        if let Some(handle) = self.worker.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Stream for ReplayStream {
    type Item = TapeResult<ReplayItem>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Walks the requested range minute by minute, streaming each slice as it
/// lands in the cache index. Strictly sequential: one open slice at a time,
/// records in file order, slices in key order.
struct ReplayDriver {
    index: Arc<SliceIndex>,
    current: DateTime<Utc>,
    end: DateTime<Utc>,
    open: Option<SliceReader>,
    skip_decoding: bool,
    with_disconnect_markers: bool,
    last_was_disconnect: bool,
    done: bool,
}

impl ReplayDriver {
    fn into_stream(self) -> impl Stream<Item = TapeResult<ReplayItem>> + Send {
        stream::unfold(self, |mut driver| async move {
            if driver.done {
                return None;
            }
            match driver.next_item().await {
                Ok(Some(item)) => Some((Ok(item), driver)),
                Ok(None) => None,
                Err(err) => {
                    driver.done = true;
                    Some((Err(err), driver))
                }
            }
        })
    }

    async fn next_item(&mut self) -> TapeResult<Option<ReplayItem>> {
        loop {
            if let Some(reader) = self.open.as_mut() {
                match reader.next_line().await? {
                    Some(SliceLine::Record {
                        local_timestamp,
                        payload,
                    }) => {
                        self.last_was_disconnect = false;
                        let item = if self.skip_decoding {
                            ReplayItem::Raw(RawReplayMessage {
                                local_timestamp,
                                payload,
                            })
                        } else {
                            ReplayItem::Message(ReplayMessage {
                                local_timestamp: parse_local_timestamp(&local_timestamp)?,
                                payload: serde_json::from_slice(&payload)?,
                            })
                        };
                        return Ok(Some(item));
                    }
                    Some(SliceLine::Disconnect) => {
                        if self.with_disconnect_markers && !self.last_was_disconnect {
                            self.last_was_disconnect = true;
                            return Ok(Some(ReplayItem::Disconnect));
                        }
                    }
                    None => {
                        let was_empty = reader.records() == 0;
                        self.open = None;
                        self.index.remove(self.current);
                        self.current += TimeDelta::minutes(1);
                        if was_empty && self.with_disconnect_markers && !self.last_was_disconnect {
                            self.last_was_disconnect = true;
                            return Ok(Some(ReplayItem::Disconnect));
                        }
                    }
                }
                continue;
            }

            if self.current >= self.end {
                debug!("replay finished");
                return Ok(None);
            }
            let path = await_slice(&self.index, self.current).await?;
            self.open = Some(SliceReader::open(&path).await?);
        }
    }
}

/// Wait for a minute to land in the index. A slice that already arrived is
/// always consumed; the latched worker error is raised only while the slice
/// is still absent.
async fn await_slice(index: &SliceIndex, minute: DateTime<Utc>) -> TapeResult<PathBuf> {
    loop {
        if let Some(path) = index.get(minute) {
            return Ok(path);
        }
        if let Some(err) = index.take_error() {
            return Err(err);
        }
        tokio::time::sleep(SLICE_POLL_INTERVAL).await;
    }
}
