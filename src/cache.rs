use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Timelike, Utc};
use sha2::{Digest, Sha256};

use crate::error::TapeError;
use crate::exchange::{Exchange, Filter};

/// Stable identity of a filter set. Keeps differently-filtered captures of
/// the same venue apart on disk; insensitive to filter ordering.
pub(crate) fn filter_set_hash(filters: &[Filter]) -> String {
    let mut sorted = filters.to_vec();
    sorted.sort();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..8])
}

pub(crate) fn slice_path(
    cache_dir: &Path,
    exchange: Exchange,
    filter_hash: &str,
    minute: DateTime<Utc>,
) -> PathBuf {
    cache_dir
        .join("feeds")
        .join(exchange.as_str())
        .join(filter_hash)
        .join(format!("{:04}", minute.year()))
        .join(format!("{:02}", minute.month()))
        .join(format!("{:02}", minute.day()))
        .join(format!(
            "{:02}-{:02}.json.gz",
            minute.hour(),
            minute.minute()
        ))
}

/// Deterministic location of one minute slice under the cache directory.
pub fn cached_slice_path(
    cache_dir: &Path,
    exchange: Exchange,
    filters: &[Filter],
    minute: DateTime<Utc>,
) -> PathBuf {
    slice_path(cache_dir, exchange, &filter_set_hash(filters), minute)
}

/// Minute-to-path index shared between the fetch worker (single writer) and
/// the replay driver (single reader), with a latched terminal worker error.
#[derive(Default)]
pub(crate) struct SliceIndex {
    slices: Mutex<HashMap<DateTime<Utc>, PathBuf>>,
    error: Mutex<Option<TapeError>>,
}

impl SliceIndex {
    pub(crate) fn insert(&self, minute: DateTime<Utc>, path: PathBuf) {
        self.slices.lock().unwrap().insert(minute, path);
    }

    pub(crate) fn get(&self, minute: DateTime<Utc>) -> Option<PathBuf> {
        self.slices.lock().unwrap().get(&minute).cloned()
    }

    pub(crate) fn remove(&self, minute: DateTime<Utc>) {
        self.slices.lock().unwrap().remove(&minute);
    }

    /// Latch the first terminal worker error; later errors are dropped.
    pub(crate) fn set_error(&self, err: TapeError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn take_error(&self) -> Option<TapeError> {
        self.error.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slice_paths_are_deterministic_and_dated() {
        let minute = Utc.with_ymd_and_hms(2020, 3, 1, 7, 5, 0).unwrap();
        let filters = [Filter::channel("trade")];
        let path = cached_slice_path(Path::new("/cache"), Exchange::Bitmex, &filters, minute);
        let rendered = path.to_string_lossy();
        assert!(rendered.starts_with("/cache/feeds/bitmex/"));
        assert!(rendered.ends_with("/2020/03/01/07-05.json.gz"));
    }

    #[test]
    fn filter_hash_ignores_ordering_but_not_content() {
        let a = [
            Filter::channel("trade").with_symbols(vec!["XBTUSD".into()]),
            Filter::channel("quote"),
        ];
        let b = [
            Filter::channel("quote"),
            Filter::channel("trade").with_symbols(vec!["XBTUSD".into()]),
        ];
        let c = [Filter::channel("quote")];
        assert_eq!(filter_set_hash(&a), filter_set_hash(&b));
        assert_ne!(filter_set_hash(&a), filter_set_hash(&c));
        assert_eq!(filter_set_hash(&a).len(), 16);
    }

    #[test]
    fn index_latches_only_the_first_error() {
        let index = SliceIndex::default();
        assert!(index.take_error().is_none());
        index.set_error(TapeError::Fetch("first".into()));
        index.set_error(TapeError::Fetch("second".into()));
        let err = index.take_error().unwrap();
        assert!(err.to_string().contains("first"));
        assert!(index.take_error().is_none());
    }

    #[test]
    fn index_entries_come_and_go() {
        let index = SliceIndex::default();
        let minute = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap();
        assert!(index.get(minute).is_none());
        index.insert(minute, PathBuf::from("/cache/slice.json.gz"));
        assert_eq!(index.get(minute).unwrap(), PathBuf::from("/cache/slice.json.gz"));
        index.remove(minute);
        assert!(index.get(minute).is_none());
    }
}
