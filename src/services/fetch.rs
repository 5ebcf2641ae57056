use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;

use crate::core::config::Config;

/// Plain HTTP GET returning the body only for a 2xx response.
///
/// Network errors and non-2xx statuses are both reported as `None`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Option<Vec<u8>>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn try_get(&self, url: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            log::debug!("GET {} -> {}", url, status);
            return Ok(None);
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        log::debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(Some(body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Option<Vec<u8>> {
        match self.try_get(url).await {
            Ok(body) => body,
            Err(e) => {
                log::debug!("GET {} failed: {:#}", url, e);
                None
            }
        }
    }
}

/// Fetches chapter media from the primary host, then the fallback host.
pub struct MediaClient<T: Transport> {
    transport: T,
    primary: String,
    fallback: String,
}

impl<T: Transport> MediaClient<T> {
    pub fn new(transport: T, primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            transport,
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    pub fn from_config(transport: T, config: &Config) -> Self {
        Self::new(
            transport,
            config.media_url.clone(),
            config.media_fallback_url.clone(),
        )
    }

    /// One request per host at most; the fallback is only contacted after the
    /// primary host has failed.
    pub async fn fetch_with_fallback(&self, path: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.transport.get(&format!("{}{}", self.primary, path)).await {
            return Some(bytes);
        }
        log::warn!("Primary media host failed for {}, trying fallback", path);
        self.transport
            .get(&format!("{}{}", self.fallback, path))
            .await
    }

    pub async fn fetch_direct(&self, url: &str) -> Option<Vec<u8>> {
        self.transport.get(url).await
    }
}
