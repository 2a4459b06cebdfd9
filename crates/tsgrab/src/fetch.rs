use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{DecryptFailurePolicy, DownloadConfig},
    error::{GrabError, GrabResult},
    hls::{ResolvedKey, Segment},
    proxy::ProxyPool,
    util::http::HttpClient,
};

pub enum FetchOutcome {
    Fetched(Bytes),
    /// Every attempt failed.
    Failed,
    /// The cancellation token fired before the segment could be fetched.
    Cancelled,
    /// An error that must end the session.
    Fatal(GrabError),
}

/// Result of fetching one segment within one retry round.
pub struct SegmentFetch {
    pub outcome: FetchOutcome,
    /// Attempts that reached the network.
    pub attempts: u32,
}

/// Downloads and decrypts single segments. Shared by all workers of a session.
pub struct SegmentFetcher {
    client: HttpClient,
    key: Option<Arc<ResolvedKey>>,
    proxies: ProxyPool,
    config: Arc<DownloadConfig>,
}

impl SegmentFetcher {
    pub fn new(
        client: HttpClient,
        key: Option<Arc<ResolvedKey>>,
        proxies: ProxyPool,
        config: Arc<DownloadConfig>,
    ) -> Self {
        Self {
            client,
            key,
            proxies,
            config,
        }
    }

    /// One attempt: GET through the segment's proxy (if any), then decrypt.
    pub async fn fetch(&self, segment: &Segment) -> GrabResult<Bytes> {
        let client = match self.proxies.select(segment.index) {
            Some(proxy) => {
                log::debug!("Use proxy: {}", proxy.url);
                &proxy.client
            }
            None => &self.client,
        };
        let bytes = client.get_bytes(segment.url.clone()).await?;

        match &self.key {
            Some(key) => key
                .decrypt(segment, &bytes)
                .map(Bytes::from)
                .map_err(|e| GrabError::Decrypt {
                    index: segment.index,
                    reason: e.to_string(),
                }),
            None => Ok(bytes),
        }
    }

    /// Fetch with up to `max_retries` attempts and exponential backoff between them.
    pub async fn fetch_with_retry(
        &self,
        segment: &Segment,
        cancel: &CancellationToken,
    ) -> SegmentFetch {
        let index = segment.index;
        let max_retries = self.config.max_retries.get();

        let mut attempts = 0;
        for attempt in 0..max_retries {
            if cancel.is_cancelled() {
                return SegmentFetch {
                    outcome: FetchOutcome::Cancelled,
                    attempts,
                };
            }

            attempts += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return SegmentFetch {
                        outcome: FetchOutcome::Cancelled,
                        attempts,
                    };
                }
                result = self.fetch(segment) => result,
            };

            match result {
                Ok(bytes) => {
                    return SegmentFetch {
                        outcome: FetchOutcome::Fetched(bytes),
                        attempts,
                    }
                }
                Err(e @ GrabError::Decrypt { .. })
                    if self.config.decrypt_failure == DecryptFailurePolicy::FailFast =>
                {
                    return SegmentFetch {
                        outcome: FetchOutcome::Fatal(e),
                        attempts,
                    };
                }
                Err(e) => {
                    log::warn!(
                        "Error downloading segment {index} (attempt {}): {e}",
                        attempt + 1
                    );
                }
            }

            if attempt + 1 < max_retries {
                let backoff = self.config.attempt_backoff(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        SegmentFetch {
            outcome: FetchOutcome::Failed,
            attempts,
        }
    }
}
