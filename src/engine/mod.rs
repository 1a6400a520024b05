pub mod backend;

use crate::model::{InfoEvent, RunConfig, RunEvent, RunNonce, Summary};
use crate::reconcile::reconcile;
use anyhow::{Context, Result};
use backend::BackendClient;
use tokio::sync::mpsc;

/// Raw, reconciled output of one run, before any view is derived from it.
#[derive(Debug, Clone)]
pub struct ReconciledRun {
    pub nonce: RunNonce,
    /// `None` when no run was triggered (persisted summary only).
    pub fast_mode: Option<bool>,
    pub backend_ok: bool,
    pub artifacts: Vec<String>,
    pub summary: Summary,
    pub log_tail: Vec<String>,
}

pub struct RunEngine {
    cfg: RunConfig,
    client: BackendClient,
}

impl RunEngine {
    pub fn new(cfg: RunConfig) -> Result<Self> {
        let client = BackendClient::new(&cfg)?;
        Ok(Self { cfg, client })
    }

    /// Trigger a run, then merge in the persisted summary on a best-effort basis.
    ///
    /// Only the trigger request can fail the run. The two requests are strictly
    /// sequential and share one nonce.
    pub async fn run(self, event_tx: mpsc::UnboundedSender<RunEvent>) -> Result<ReconciledRun> {
        let nonce = RunNonce::generate();
        let urls = self.client.artifact_urls(nonce.clone());

        let _ = event_tx.send(RunEvent::Info(InfoEvent::RunRequested {
            base_url: self.client.base_url().to_string(),
            fast_mode: self.cfg.fast_mode,
        }));

        let response = self
            .client
            .start_run(self.cfg.fast_mode)
            .await
            .context("run request failed")?;

        if !response.ok {
            tracing::warn!("backend reported ok=false for run {nonce}");
            let _ = event_tx.send(RunEvent::Info(InfoEvent::BackendReportedFailure));
        }

        let polled = match self.client.fetch_summary(&urls).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(url = e.url(), "persisted summary unavailable: {e}");
                let _ = event_tx.send(RunEvent::Info(InfoEvent::SummaryFetchFailed {
                    reason: e.to_string(),
                }));
                None
            }
        };

        let summary = reconcile(response.summary.as_ref(), polled.as_ref());
        let log_tail = response.log_tail();

        Ok(ReconciledRun {
            nonce,
            fast_mode: Some(self.cfg.fast_mode),
            backend_ok: response.ok,
            artifacts: response.artifacts,
            summary,
            log_tail,
        })
    }

    /// Read the persisted summary without triggering a run.
    ///
    /// With no run response to fall back on, a failed fetch is an error here.
    /// The legacy `figures` listing stands in for the artifact list.
    pub async fn peek(self) -> Result<ReconciledRun> {
        let nonce = RunNonce::generate();
        let urls = self.client.artifact_urls(nonce.clone());
        let summary = self
            .client
            .fetch_summary(&urls)
            .await
            .context("could not read persisted summary")?;

        let artifacts = summary
            .get("figures")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ReconciledRun {
            nonce,
            fast_mode: None,
            backend_ok: true,
            artifacts,
            summary,
            log_tail: Vec::new(),
        })
    }
}
