use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use reqwest::StatusCode;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{filter_set_hash, slice_path, SliceIndex};
use crate::error::{TapeError, TapeResult};
use crate::exchange::{Exchange, Filter};
use crate::slice::slice_key;

/// Upper bound on concurrent slice downloads.
const FETCH_CONCURRENCY: usize = 8;

/// Immutable description of one prefetch run.
pub(crate) struct FetchJob {
    pub http: reqwest::Client,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub cache_dir: PathBuf,
    pub exchange: Exchange,
    pub filters: Vec<Filter>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl FetchJob {
    /// Resolve every minute of the job, announcing completions into `index`.
    /// The first failure is latched there as the terminal worker error and
    /// stops the run.
    pub(crate) async fn run(self, index: Arc<SliceIndex>, cancel: CancellationToken) {
        let filter_hash = filter_set_hash(&self.filters);
        let exchange = self.exchange;
        let minutes = minute_range(self.from, self.to);
        let total = minutes.len();
        debug!(exchange = exchange.as_str(), slices = total, "prefetch started");

        let job = Arc::new(self);
        let mut results = futures::stream::iter(minutes.into_iter().map(|minute| {
            let job = Arc::clone(&job);
            let filter_hash = filter_hash.clone();
            async move {
                job.resolve_slice(minute, &filter_hash)
                    .await
                    .map(|path| (minute, path))
            }
        }))
        .buffer_unordered(FETCH_CONCURRENCY);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(exchange = exchange.as_str(), "prefetch cancelled");
                    return;
                }
                next = results.next() => match next {
                    Some(Ok((minute, path))) => index.insert(minute, path),
                    Some(Err(err)) => {
                        warn!(exchange = exchange.as_str(), "prefetch failed: {err}");
                        index.set_error(err);
                        return;
                    }
                    None => {
                        debug!(exchange = exchange.as_str(), slices = total, "prefetch finished");
                        return;
                    }
                }
            }
        }
    }

    /// Cache hit, or download into place. The slice only becomes visible at
    /// its final path once fully written.
    async fn resolve_slice(&self, minute: DateTime<Utc>, filter_hash: &str) -> TapeResult<PathBuf> {
        let path = slice_path(&self.cache_dir, self.exchange, filter_hash, minute);
        if fs::try_exists(&path).await? {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("gz.tmp");
        self.download_slice(minute, &tmp).await?;
        fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    async fn download_slice(&self, minute: DateTime<Utc>, tmp: &Path) -> TapeResult<()> {
        let key = slice_key(minute);
        let url = format!("{}/v1/data-feeds/{}", self.endpoint, self.exchange);
        let mut request = self.http.get(&url).query(&[("slice", key.as_str())]);
        if !self.filters.is_empty() {
            let filters = serde_json::to_string(&self.filters)?;
            request = request.query(&[("filters", filters.as_str())]);
        }
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // The venue has no data for this minute; cache it as empty.
            debug!(slice = %key, "no data, caching empty slice");
            fs::write(tmp, empty_gzip()).await?;
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TapeError::Fetch(format!(
                "slice {key} request failed with status {status}: {}",
                truncate(&body, 256)
            )));
        }

        let mut file = fs::File::create(tmp).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let bytes =
                chunk.map_err(|err| TapeError::Fetch(format!("slice {key} body read: {err}")))?;
            file.write_all(&bytes).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

fn minute_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut minutes = Vec::new();
    let mut cursor = from;
    while cursor < to {
        minutes.push(cursor);
        cursor += TimeDelta::minutes(1);
    }
    minutes
}

/// A valid gzip stream decompressing to zero bytes.
fn empty_gzip() -> Vec<u8> {
    GzEncoder::new(Vec::new(), Compression::default())
        .finish()
        .unwrap_or_default()
}

pub(crate) fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        body.to_string()
    } else {
        format!("{}…", &body[..max])
    }
}
