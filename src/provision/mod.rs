//! Asset provisioning: fetch the source files of resolved resources, through
//! a content-addressed cache shared by every job in the process.
//!
//! A cache entry is keyed by location and version, so a catalog version bump
//! produces a new key and the stale entry is simply never read again. At most
//! one fetch per key is in flight: later requesters await the first one.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::Transport;
use crate::config::Config;
use crate::error::FetchError;
use crate::lookup::{AssetLocation, ResolvedResource};

pub mod fetch;

pub use fetch::{AssetFetcher, GitFetcher, HttpFetcher, TransportFetcher};

const COMPLETE_MARKER: &str = ".complete";

/// SHA-256 hex digest of the location identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Git clones cover the whole repository, so only url and version count;
    /// HTTP fetches also depend on the requested paths.
    pub fn for_location(location: &AssetLocation) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(location.url.trim_end_matches('/').as_bytes());
        hasher.update(b"@");
        hasher.update(location.version.as_bytes());
        if location.transport == Transport::Http {
            for path in &location.paths {
                hasher.update(b"\n");
                hasher.update(path.as_bytes());
            }
        }
        CacheKey(hex::encode(hasher.finalize()))
    }
}

/// Files on disk for one fetched location.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub key: CacheKey,
    pub root: PathBuf,
    pub fetched_at: DateTime<Utc>,
    /// True for uncached fetches; the directory belongs to one job.
    pub ephemeral: bool,
}

/// Fetched files for one resolved resource.
#[derive(Debug, Clone)]
pub struct AssetBundle {
    pub resource: ResolvedResource,
    pub asset: Arc<CachedAsset>,
}

impl AssetBundle {
    pub fn root(&self) -> &Path {
        &self.asset.root
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Exponential backoff: base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub struct AssetProvisioner {
    fetcher: Arc<dyn AssetFetcher>,
    cache_enabled: bool,
    entries: DashMap<CacheKey, Arc<OnceCell<Arc<CachedAsset>>>>,
    working_dir: PathBuf,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    permits: Arc<Semaphore>,
    fetch_concurrency: usize,
}

impl AssetProvisioner {
    pub fn new(cfg: &Config, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            cache_enabled: cfg.cache.enabled,
            entries: DashMap::new(),
            working_dir: cfg.working_dir(),
            retry: RetryPolicy {
                max_attempts: cfg.retry.max_attempts,
                base_backoff: Duration::from_millis(cfg.retry.base_backoff_ms),
                max_backoff: Duration::from_millis(cfg.retry.max_backoff_ms),
            },
            fetch_timeout: cfg.fetch_timeout(),
            permits: Arc::new(Semaphore::new(cfg.workers.fetch_concurrency)),
            fetch_concurrency: cfg.workers.fetch_concurrency,
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// Provision every found resource, in input order, bounded by the fetch
    /// pool. Resources without a location are skipped.
    pub async fn provision_all(
        &self,
        resources: &[ResolvedResource],
    ) -> Vec<(ResolvedResource, Result<AssetBundle, FetchError>)> {
        let found: Vec<ResolvedResource> =
            resources.iter().filter(|r| r.is_found()).cloned().collect();
        stream::iter(found)
            .map(|resource| async move {
                let result = self.provision(&resource).await;
                (resource, result)
            })
            .buffered(self.fetch_concurrency)
            .collect()
            .await
    }

    #[instrument(skip_all, fields(resource = %resource.request))]
    pub async fn provision(&self, resource: &ResolvedResource) -> Result<AssetBundle, FetchError> {
        let Some(location) = resource.location() else {
            return Err(FetchError::Terminal {
                location: resource.request.to_string(),
                message: "resource has no resolved location".to_string(),
            });
        };
        let key = CacheKey::for_location(location);
        let asset = if self.cache_enabled {
            let cell = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();
            cell.get_or_try_init(|| self.load_cached(location, &key))
                .await?
                .clone()
        } else {
            let dir = self
                .working_dir
                .join("scratch")
                .join(Uuid::new_v4().to_string());
            self.fetch_with_retry(location, &dir).await?;
            Arc::new(CachedAsset {
                key,
                root: dir,
                fetched_at: Utc::now(),
                ephemeral: true,
            })
        };
        Ok(AssetBundle {
            resource: resource.clone(),
            asset,
        })
    }

    /// Reuse a completed on-disk entry or fetch into the cache directory.
    async fn load_cached(
        &self,
        location: &AssetLocation,
        key: &CacheKey,
    ) -> Result<Arc<CachedAsset>, FetchError> {
        let dir = self.working_dir.join("cache").join(&key.0);
        let marker = dir.join(COMPLETE_MARKER);
        if let Ok(meta) = tokio::fs::metadata(&marker).await {
            debug!(key = %key.0, "asset cache hit on disk");
            let fetched_at = meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            return Ok(Arc::new(CachedAsset {
                key: key.clone(),
                root: dir,
                fetched_at,
                ephemeral: false,
            }));
        }
        self.fetch_with_retry(location, &dir).await?;
        tokio::fs::write(&marker, location.to_string())
            .await
            .map_err(|err| FetchError::Terminal {
                location: location.to_string(),
                message: format!("failed to mark cache entry complete: {}", err),
            })?;
        Ok(Arc::new(CachedAsset {
            key: key.clone(),
            root: dir,
            fetched_at: Utc::now(),
            ephemeral: false,
        }))
    }

    async fn fetch_with_retry(&self, location: &AssetLocation, dest: &Path) -> Result<(), FetchError> {
        let mut attempt = 1;
        loop {
            reset_dir(location, dest).await?;
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| FetchError::Terminal {
                    location: location.to_string(),
                    message: "fetch pool closed".to_string(),
                })?;
                match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(location, dest))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        location: location.to_string(),
                        seconds: self.fetch_timeout.as_secs(),
                    }),
                }
            };
            match result {
                Ok(()) => {
                    info!(%location, attempt, "fetched asset");
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(?err, %location, attempt, ?delay, "fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(?err, %location, attempt, "fetch failed");
                    let _ = tokio::fs::remove_dir_all(dest).await;
                    return Err(err);
                }
            }
        }
    }
}

async fn reset_dir(location: &AssetLocation, dir: &Path) -> Result<(), FetchError> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|err| FetchError::Terminal {
                location: location.to_string(),
                message: format!("failed to clear {}: {}", dir.display(), err),
            })?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| FetchError::Terminal {
            location: location.to_string(),
            message: format!("failed to create {}: {}", dir.display(), err),
        })
}

/// Remove the job-private directories of uncached bundles.
pub async fn release(bundles: &[AssetBundle]) {
    for bundle in bundles.iter().filter(|b| b.asset.ephemeral) {
        if let Err(err) = tokio::fs::remove_dir_all(bundle.root()).await {
            debug!(?err, root = %bundle.root().display(), "failed to remove scratch dir");
        }
    }
}
