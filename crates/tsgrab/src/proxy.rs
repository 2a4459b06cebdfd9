use std::path::Path;

use futures::future::join_all;
use reqwest::Url;

use crate::{
    config::DownloadConfig,
    error::{GrabError, GrabResult},
    util::http::HttpClient,
};

#[derive(Clone)]
pub struct ProxyEndpoint {
    pub url: String,
    pub client: HttpClient,
}

/// Proxies that passed validation. Read-only for the rest of the session.
#[derive(Clone, Default)]
pub struct ProxyPool {
    proxies: Vec<ProxyEndpoint>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<ProxyEndpoint>) -> Self {
        Self { proxies }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Proxy for segment `index`. A segment always goes through the same proxy.
    pub fn select(&self, index: usize) -> Option<&ProxyEndpoint> {
        if self.proxies.is_empty() {
            return None;
        }
        self.proxies.get(index % self.proxies.len())
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.proxies.iter().map(|p| p.url.as_str())
    }
}

/// Read one proxy URL per line. Blank lines and `#` comments are skipped.
pub async fn read_proxy_list(path: &Path) -> GrabResult<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Probe every candidate by fetching `probe_url` through it.
pub async fn validate_proxies(
    client: &HttpClient,
    config: &DownloadConfig,
    candidates: Vec<String>,
    probe_url: &Url,
) -> GrabResult<ProxyPool> {
    log::info!("Start validation proxy.");
    let total = candidates.len();

    let probes = candidates.into_iter().map(|proxy| async move {
        let client = match client.with_proxy(config, &proxy) {
            Ok(client) => client,
            Err(e) => {
                log::warn!("Invalid proxy {proxy}: {e}");
                return None;
            }
        };
        let response = client
            .get(probe_url.clone())
            .timeout(config.proxy_probe_timeout)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => Some(ProxyEndpoint {
                url: proxy,
                client,
            }),
            Ok(response) => {
                log::debug!("Proxy {proxy} rejected: {}", response.status());
                None
            }
            Err(e) => {
                log::debug!("Proxy {proxy} rejected: {e}");
                None
            }
        }
    });
    let proxies: Vec<ProxyEndpoint> = join_all(probes).await.into_iter().flatten().collect();

    log::info!("N. Valid ip: [{}/{total}]", proxies.len());
    if proxies.is_empty() {
        return Err(GrabError::ProxyExhaustion(total));
    }
    Ok(ProxyPool::new(proxies))
}
