use std::{ops::Deref, str::FromStr, sync::Arc};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder, IntoUrl, Proxy, Url,
};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::{
    config::DownloadConfig,
    error::{GrabError, GrabResult},
};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> GrabResult<Self> {
        Self::with_store(builder, Arc::new(CookieStoreMutex::new(CookieStore::default())))
    }

    fn with_store(builder: ClientBuilder, cookies_store: Arc<CookieStoreMutex>) -> GrabResult<Self> {
        let client = builder.cookie_provider(cookies_store.clone()).build()?;
        Ok(Self {
            client,
            cookies_store,
        })
    }

    /// Build a client honoring the timeout, TLS and header settings of `config`.
    pub fn from_config(config: &DownloadConfig) -> GrabResult<Self> {
        Self::new(Self::builder(config)?)
    }

    /// A client with the same settings and cookie jar, routed through `proxy`.
    pub fn with_proxy(&self, config: &DownloadConfig, proxy: &str) -> GrabResult<Self> {
        let builder = Self::builder(config)?.proxy(Proxy::all(proxy)?);
        Self::with_store(builder, self.cookies_store.clone())
    }

    fn builder(config: &DownloadConfig) -> GrabResult<ClientBuilder> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_str(name)
                .map_err(|e| GrabError::InvalidHeader(format!("name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GrabError::InvalidHeader(format!("value {value}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        Ok(builder)
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> GrabResult<()> {
        let url = url.into_url()?;
        let mut lock = self
            .cookies_store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for cookie in cookies {
            _ = lock.parse(&cookie, &url);
        }
        Ok(())
    }

    /// GET `url`, treating any non-2xx status as an error.
    pub async fn get_bytes(&self, url: Url) -> GrabResult<Bytes> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            if let Ok(body) = response.text().await {
                log::debug!("Error body: {body}");
            }
            return Err(GrabError::HttpStatus(status));
        }

        Ok(response.bytes().await?)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store.clone())
            .build()
            .unwrap_or_default();

        Self {
            client,
            cookies_store,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
