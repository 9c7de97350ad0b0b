//! Adapters for the processing service: the ingestion request and the push channel.

pub mod channel;
pub mod upload;

use crate::model::RunConfig;
use anyhow::{anyhow, Context, Result};
use reqwest::Url;

/// HTTP client plus the three addresses the service exposes.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    pub http: reqwest::Client,
    pub connect_timeout: std::time::Duration,
    upload_url: Url,
    ws_url: Url,
    results_url: Url,
}

impl ServiceClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("base URL must start with http:// or https://"));
        }

        let upload_url = base_url
            .join(&cfg.upload_path)
            .with_context(|| format!("invalid upload path: {}", cfg.upload_path))?;
        let results_url = base_url
            .join(&cfg.results_path)
            .with_context(|| format!("invalid results path: {}", cfg.results_path))?;

        // Push channel address: same host, scheme switched to ws/wss.
        let mut ws_url = base_url
            .join(&cfg.ws_path)
            .with_context(|| format!("invalid websocket path: {}", cfg.ws_path))?;
        let scheme = if ws_url.scheme() == "https" { "wss" } else { "ws" };
        ws_url
            .set_scheme(scheme)
            .map_err(|_| anyhow!("cannot switch {} to {scheme}", cfg.base_url))?;

        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.upload_timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            connect_timeout: cfg.connect_timeout,
            upload_url,
            ws_url,
            results_url,
        })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    /// Where the service publishes the enhanced copy of `filename`.
    pub fn result_url(&self, filename: &str) -> Url {
        let mut url = self.results_url.clone();
        // http(s) URLs always have path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&format!("enhanced_{filename}"));
        }
        url
    }
}
