use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::error::ScrapeError;
use crate::settings::Settings;

/// Downloads one ladder page. Every error is treated as transient.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, world: &str, page: u32) -> Result<String, ScrapeError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    ladder_url: String,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: http_client(&settings.user_agent, settings.fetch_timeout())?,
            ladder_url: settings.ladder_url.clone(),
        })
    }

    fn page_url(&self, world: &str, page: u32) -> String {
        format!("{}{}?page={}", self.ladder_url, world, page)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, world: &str, page: u32) -> Result<String, ScrapeError> {
        let url = self.page_url(world, page);
        debug!("GET {}", url);
        get_text(&self.client, &url)
            .await
            .map_err(|e| ScrapeError::fetch(page, format!("{:#}", e)))
    }
}

pub fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

pub async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await.context("HTTP request failed")?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("HTTP {} for {}", status, url);
    }
    response.text().await.context("Failed to read response body")
}
