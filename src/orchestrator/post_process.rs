//! Post-run processing utilities.
//!
//! Derives the presentation view from a reconciled run and handles exports.

use crate::artifacts::{classify, ArtifactUrls};
use crate::digest::{digest_log, digest_summary};
use crate::engine::ReconciledRun;
use crate::export;
use crate::features::normalize;
use crate::kpi::derive_kpis;
use crate::model::RunView;
use std::path::Path;
use std::sync::Arc;

/// Result of post-run processing, ready for presentation layers.
pub struct ProcessedRun {
    pub view: Arc<RunView>,
    pub export_messages: Vec<String>,
}

/// Build every derived view for a run. Each part degrades on its own.
pub fn build_view(run: ReconciledRun, base_url: &str) -> RunView {
    let urls = ArtifactUrls::new(base_url, run.nonce.clone());
    let figures = classify(&run.summary, &run.artifacts, &urls);
    let features = normalize(&run.summary);
    let kpis = derive_kpis(&run.summary);
    let digest = digest_summary(&run.summary);
    let log = digest_log(run.log_tail);

    RunView {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        base_url: base_url.trim_end_matches('/').to_string(),
        nonce: run.nonce,
        fast_mode: run.fast_mode,
        backend_ok: run.backend_ok,
        artifacts: run.artifacts,
        summary: run.summary,
        figures,
        features,
        kpis,
        digest,
        log,
    }
}

/// Process a completed run: derive the view, then export if requested.
pub fn process_run_completion(
    base_url: &str,
    export_json: Option<&Path>,
    run: ReconciledRun,
) -> ProcessedRun {
    let view = Arc::new(build_view(run, base_url));

    let mut export_messages = Vec::new();
    if let Some(path) = export_json {
        match export::export_json(path, &view) {
            Ok(()) => export_messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun {
        view,
        export_messages,
    }
}
