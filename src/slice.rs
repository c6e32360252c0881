use std::path::Path;

use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::BufReader;

use crate::error::{TapeError, TapeResult};
use crate::lines::LineSplitter;

/// Read and gunzip buffer capacity. Slices decompress an order of magnitude
/// larger than they store, so the chunks stay big.
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Width of the local-capture timestamp prefix on every record.
pub(crate) const TIMESTAMP_WIDTH: usize = 28;

/// Align an instant down to its UTC minute boundary.
pub fn minute_floor(instant: DateTime<Utc>) -> DateTime<Utc> {
    let secs = instant.timestamp();
    let floored = secs - secs.rem_euclid(60);
    DateTime::from_timestamp(floored, 0).unwrap_or(instant)
}

/// Render a minute boundary the way slices are keyed on the wire,
/// e.g. `2020-03-01T00:00:00.000Z`.
pub fn slice_key(minute: DateTime<Utc>) -> String {
    minute.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse the fixed-width timestamp prefix of a record.
pub(crate) fn parse_local_timestamp(bytes: &[u8]) -> TapeResult<DateTime<Utc>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| TapeError::Decode("record timestamp prefix is not ASCII".to_string()))?;
    text.parse::<DateTime<Utc>>()
        .map_err(|err| TapeError::Decode(format!("bad record timestamp {text:?}: {err}")))
}

/// One parsed line of a decompressed slice.
#[derive(Debug)]
pub(crate) enum SliceLine {
    Record {
        local_timestamp: Bytes,
        payload: Bytes,
    },
    Disconnect,
}

/// Streaming reader over a single cached slice file.
///
/// Lines shorter than the timestamp prefix plus separator are corrupt and
/// fatal, as are gzip and I/O failures. A zero-length cache file reads as
/// an empty slice.
pub(crate) struct SliceReader {
    lines: Option<LineSplitter<BufReader<GzipDecoder<BufReader<File>>>>>,
    records: u64,
    path: String,
}

impl SliceReader {
    pub(crate) async fn open(path: &Path) -> TapeResult<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        let lines = (len > 0).then(|| {
            let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
            let decoder = GzipDecoder::new(reader);
            LineSplitter::new(BufReader::with_capacity(READ_BUFFER_SIZE, decoder))
        });
        Ok(Self {
            lines,
            records: 0,
            path: path.display().to_string(),
        })
    }

    /// Count of non-empty records seen so far; lets the caller detect a
    /// slice that decompressed to nothing but disconnects.
    pub(crate) fn records(&self) -> u64 {
        self.records
    }

    pub(crate) async fn next_line(&mut self) -> TapeResult<Option<SliceLine>> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        let path = &self.path;
        let line = lines
            .next_line()
            .await
            .map_err(|err| TapeError::Decode(format!("{path}: {err}")))?;
        let Some(line) = line else {
            return Ok(None);
        };
        if line.is_empty() {
            return Ok(Some(SliceLine::Disconnect));
        }
        if line.len() < TIMESTAMP_WIDTH + 2 {
            return Err(TapeError::Decode(format!(
                "{path}: truncated record of {} bytes",
                line.len()
            )));
        }
        self.records += 1;
        let local_timestamp = Bytes::copy_from_slice(&line[..TIMESTAMP_WIDTH]);
        // byte 28 is the separating space
        let payload = Bytes::copy_from_slice(&line[TIMESTAMP_WIDTH + 1..]);
        Ok(Some(SliceLine::Record {
            local_timestamp,
            payload,
        }))
    }
}
