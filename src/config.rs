use std::path::PathBuf;

use tracing::warn;

const DEFAULT_ENDPOINT: &str = "https://tardis.dev/api";

/// Connection and cache settings handed to [`TapeClient`](crate::TapeClient).
///
/// The configuration is immutable once a client is constructed; there is no
/// late re-initialization.
#[derive(Clone, Debug)]
pub struct TapeConfig {
    pub endpoint: String,
    pub cache_dir: PathBuf,
    pub api_key: Option<String>,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            cache_dir: std::env::temp_dir().join(".chronotape-cache"),
            api_key: None,
        }
    }
}

impl TapeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Recursively delete the on-disk slice cache. Failures are logged and
    /// swallowed; a missing cache dir is not a failure.
    pub async fn clear_cache(&self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.cache_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "failed to clear cache at {}: {err}",
                    self.cache_dir.display()
                );
            }
        }
    }
}
