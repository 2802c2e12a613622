//! Outbound HTTP for lockreplay.
//!
//! [`Requests`] is the only component that touches the network. It caps the
//! number of in-flight requests, retries transient failures, and memoizes
//! cachable bodies in an injected [`CacheStore`].

pub mod cache;
pub mod metadata;
mod retry;

pub use cache::{CacheStore, DiskCache, MemoryCache, NoCache};
pub use metadata::RemoteUrlMetadata;

use crate::config::{CacheMode, Config};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response};
use retry::{check_status, classify_error, with_retry, RetryPolicy};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors surfaced by the transport after retries are exhausted.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request to '{url}' failed with status {status} after {attempts} attempt(s)")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("Request to '{url}' failed after {attempts} attempt(s): {reason}")]
    Connection {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Failed to read response body from '{url}': {reason}")]
    Body { url: String, reason: String },

    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Transport is shut down")]
    Closed,
}

/// Shared, cloneable HTTP handle.
///
/// Clones share the connection pool, the concurrency limit and the cache.
#[derive(Debug, Clone)]
pub struct Requests {
    http: Client,
    cache: Arc<dyn CacheStore>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl Requests {
    /// Create a transport configured from `config`, with the cache it names.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let cache: Arc<dyn CacheStore> = match &config.cache {
            CacheMode::Memory => Arc::new(MemoryCache::new()),
            CacheMode::Disk(root) => Arc::new(DiskCache::new(root)),
            CacheMode::Disabled => Arc::new(NoCache),
        };
        Self::with_cache(config, cache)
    }

    /// Create a transport with an explicit cache store.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_cache(config: &Config, cache: Arc<dyn CacheStore>) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(concat!("lockreplay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            http,
            cache,
            permits: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
            retry: RetryPolicy {
                attempts: config.retries.max(1),
                base_delay: config.retry_base_delay,
            },
        })
    }

    /// The cache store backing cachable requests.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Fetch the complete body of `url`.
    ///
    /// With `cachable`, a body fetched earlier through a cachable request is
    /// returned without network I/O.
    ///
    /// # Errors
    /// Returns an error once the retry budget is exhausted or on a
    /// non-retryable status.
    pub async fn read_all(&self, url: &str, cachable: bool) -> Result<Bytes, TransportError> {
        if cachable {
            if let Some(hit) = self.cache.get(url) {
                tracing::debug!(url, "cache hit");
                return Ok(hit);
            }
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?;

        tracing::debug!(url, "fetching");
        let body = with_retry(&self.retry, url, |attempt| async move {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| classify_error(url, &e, attempt))?;
            let response = check_status(url, response, attempt)?;
            response
                .bytes()
                .await
                .map_err(|e| classify_error(url, &e, attempt))
        })
        .await?;

        if cachable {
            self.cache.put(url, body.clone());
        }

        Ok(body)
    }

    /// Stream the body of `url` in chunks of at most `size` bytes.
    ///
    /// The request itself is retried like [`read_all`](Self::read_all); an
    /// error while the body is streaming ends the stream with that error.
    /// With `cachable`, the body is collected as it streams and stored once
    /// the stream completes.
    pub fn read_parts(
        &self,
        url: &str,
        size: usize,
        cachable: bool,
    ) -> BoxStream<'static, Result<Bytes, TransportError>> {
        let start = Parts::Start {
            requests: self.clone(),
            url: url.to_string(),
            size: size.max(1),
            cachable,
        };

        stream::try_unfold(start, next_part).boxed()
    }

    async fn send(&self, url: &str) -> Result<Response, TransportError> {
        with_retry(&self.retry, url, |attempt| async move {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| classify_error(url, &e, attempt))?;
            check_status(url, response, attempt)
        })
        .await
    }
}

enum Parts {
    Start {
        requests: Requests,
        url: String,
        size: usize,
        cachable: bool,
    },
    Cached {
        remaining: Bytes,
        size: usize,
    },
    Streaming {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        carry: Bytes,
        size: usize,
        url: String,
        collected: Option<(Arc<dyn CacheStore>, BytesMut)>,
        _permit: OwnedSemaphorePermit,
    },
}

async fn next_part(mut state: Parts) -> Result<Option<(Bytes, Parts)>, TransportError> {
    loop {
        state = match state {
            Parts::Start {
                requests,
                url,
                size,
                cachable,
            } => {
                if cachable {
                    if let Some(hit) = requests.cache.get(&url) {
                        tracing::debug!(url = %url, "cache hit");
                        state = Parts::Cached {
                            remaining: hit,
                            size,
                        };
                        continue;
                    }
                }

                let permit = Arc::clone(&requests.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| TransportError::Closed)?;

                tracing::debug!(url = %url, "streaming");
                let response = requests.send(&url).await?;
                let collected = cachable.then(|| (Arc::clone(&requests.cache), BytesMut::new()));

                Parts::Streaming {
                    body: response.bytes_stream().boxed(),
                    carry: Bytes::new(),
                    size,
                    url,
                    collected,
                    _permit: permit,
                }
            }
            Parts::Cached {
                mut remaining,
                size,
            } => {
                if remaining.is_empty() {
                    return Ok(None);
                }
                let part = remaining.split_to(size.min(remaining.len()));
                return Ok(Some((part, Parts::Cached { remaining, size })));
            }
            Parts::Streaming {
                mut body,
                mut carry,
                size,
                url,
                mut collected,
                _permit,
            } => {
                if !carry.is_empty() {
                    let part = carry.split_to(size.min(carry.len()));
                    let next = Parts::Streaming {
                        body,
                        carry,
                        size,
                        url,
                        collected,
                        _permit,
                    };
                    return Ok(Some((part, next)));
                }

                match body.next().await {
                    Some(Ok(chunk)) => {
                        if let Some((_, buffer)) = collected.as_mut() {
                            buffer.extend_from_slice(&chunk);
                        }
                        Parts::Streaming {
                            body,
                            carry: chunk,
                            size,
                            url,
                            collected,
                            _permit,
                        }
                    }
                    Some(Err(e)) => {
                        return Err(TransportError::Body {
                            url,
                            reason: e.to_string(),
                        });
                    }
                    None => {
                        if let Some((cache, buffer)) = collected {
                            cache.put(&url, buffer.freeze());
                        }
                        return Ok(None);
                    }
                }
            }
        };
    }
}
