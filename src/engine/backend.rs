use crate::artifacts::ArtifactUrls;
use crate::error::BackendError;
use crate::model::{RunConfig, RunNonce, RunResponse, Summary};
use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::CACHE_CONTROL;
use serde::Serialize;

/// Longest error body kept in a `BackendError::Status`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct RunRequest {
    fast_mode: bool,
}

/// Thin HTTP client for the forecasting backend. Returns raw payloads only.
#[derive(Debug, Clone)]
pub struct BackendClient {
    pub(crate) http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn run_url(&self) -> String {
        format!("{}/run", self.base_url)
    }

    pub fn artifact_urls(&self, nonce: RunNonce) -> ArtifactUrls {
        ArtifactUrls::new(&self.base_url, nonce)
    }

    /// `POST /run`. Any failure here is a hard failure for the run.
    pub async fn start_run(&self, fast_mode: bool) -> Result<RunResponse, BackendError> {
        let url = self.run_url();
        tracing::debug!(%url, fast_mode, "starting run");
        let resp = self
            .http
            .post(&url)
            .json(&RunRequest { fast_mode })
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                url: url.clone(),
                source,
            })?;
        let body = success_body(&url, resp).await?;
        serde_json::from_slice(&body).map_err(|source| BackendError::Decode { url, source })
    }

    /// `GET /artifacts/summary.json?t=<nonce>`, bypassing caches.
    pub async fn fetch_summary(&self, urls: &ArtifactUrls) -> Result<Summary, BackendError> {
        let url = urls.summary();
        tracing::debug!(%url, "fetching persisted summary");
        let resp = self
            .http
            .get(&url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                url: url.clone(),
                source,
            })?;
        let body = success_body(&url, resp).await?;
        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|source| BackendError::Decode {
                url: url.clone(),
                source,
            })?;
        Summary::from_value(value).ok_or(BackendError::NotAnObject { url })
    }
}

async fn success_body(url: &str, resp: reqwest::Response) -> Result<Bytes, BackendError> {
    let status = resp.status();
    if !status.is_success() {
        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        return Err(BackendError::Status {
            url: url.to_string(),
            status,
            body,
        });
    }
    resp.bytes().await.map_err(|source| BackendError::Transport {
        url: url.to_string(),
        source,
    })
}
