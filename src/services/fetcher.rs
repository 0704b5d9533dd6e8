//! Playlist source fetcher
//!
//! Downloads raw playlist bodies with retry, and keeps a short-lived copy
//! in memory (and in Redis when configured) so repeated catalog requests
//! do not hammer the upstream hosts.

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use reqwest::{Client, StatusCode};
use sha1::{Digest, Sha1};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::Config;
use crate::services::redis::RedisService;

/// A downloaded playlist body
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    pub cache_hit: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: StatusCode },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Anything that can turn a source URL into bytes
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Fetched, FetchError>;
}

/// Generate SHA1 hash of URL for cache key
pub fn hash_url(url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Exponential backoff: 500ms, 1s, 2s, ... capped at 10s
fn backoff(attempt: u32) -> Duration {
    let ms = (1u64 << attempt.min(16)).saturating_mul(500).min(10_000);
    Duration::from_millis(ms)
}

struct CachedBody {
    body: Bytes,
    stored_at: Instant,
}

/// reqwest-backed fetcher with a two-tier body cache
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    cache_ttl: Duration,
    memory: Mutex<LruCache<String, CachedBody>>,
    redis: Option<RedisService>,
}

impl HttpFetcher {
    pub fn new(config: &Config, redis: Option<RedisService>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .gzip(true)
            .build()?;

        let capacity = NonZeroUsize::new(config.fetch_cache_max_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            client,
            max_retries: config.max_retries,
            cache_ttl: Duration::from_secs(config.fetch_cache_ttl_secs),
            memory: Mutex::new(LruCache::new(capacity)),
            redis,
        })
    }

    fn caching_enabled(&self) -> bool {
        !self.cache_ttl.is_zero()
    }

    async fn cached(&self, key: &str) -> Option<Bytes> {
        {
            let mut memory = self.memory.lock().await;
            let entry = memory
                .get(key)
                .map(|entry| (entry.stored_at.elapsed() < self.cache_ttl, entry.body.clone()));
            match entry {
                Some((true, body)) => return Some(body),
                Some((false, _)) => {
                    memory.pop(key);
                }
                None => {}
            }
        }

        let redis = self.redis.as_ref()?;
        match redis.get_playlist_body(key).await {
            Ok(Some(body)) => {
                let body = Bytes::from(body);
                self.remember_locally(key, body.clone()).await;
                Some(body)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Redis fetch cache read failed: {}", e);
                None
            }
        }
    }

    async fn remember_locally(&self, key: &str, body: Bytes) {
        self.memory.lock().await.put(
            key.to_string(),
            CachedBody {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    async fn remember(&self, key: &str, body: &Bytes) {
        self.remember_locally(key, body.clone()).await;
        if let Some(redis) = &self.redis {
            if let Err(e) = redis
                .set_playlist_body(key, body, self.cache_ttl.as_secs().max(1))
                .await
            {
                tracing::warn!("Redis fetch cache write failed: {}", e);
            }
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Bytes, FetchError> {
        let mut attempt = 0;
        loop {
            let err = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(body) => return Ok(body),
                    Err(source) => FetchError::Network {
                        url: url.to_string(),
                        source,
                    },
                },
                Ok(resp) => FetchError::Status {
                    url: url.to_string(),
                    status: resp.status(),
                },
                Err(source) => FetchError::Network {
                    url: url.to_string(),
                    source,
                },
            };

            let (retryable, reason) = match &err {
                FetchError::Status { status, .. } => {
                    (*status == StatusCode::TOO_MANY_REQUESTS, "429")
                }
                FetchError::Network { .. } => (true, "network"),
                FetchError::Client(_) => (false, "client"),
            };

            if !retryable || attempt >= self.max_retries {
                return Err(err);
            }

            let delay = backoff(attempt);
            tracing::warn!(
                "fetch_retry" = attempt + 1,
                "reason" = reason,
                "backoff_ms" = delay.as_millis() as u64
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let key = hash_url(url);

        if self.caching_enabled() {
            if let Some(body) = self.cached(&key).await {
                tracing::debug!("Fetch cache hit for {}", url);
                return Ok(Fetched {
                    body,
                    cache_hit: true,
                });
            }
        }

        let body = self.fetch_with_retry(url).await?;
        tracing::info!("Fetched {} ({} bytes)", url, body.len());

        if self.caching_enabled() {
            self.remember(&key, &body).await;
        }

        Ok(Fetched {
            body,
            cache_hit: false,
        })
    }
}
