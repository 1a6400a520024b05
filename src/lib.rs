//! Run-result reconciliation for a forecasting backend.
//!
//! Triggers a run, reconciles the run response with the persisted summary, and
//! derives the views a dashboard shows: KPIs, ranked features, classified
//! figures, and digests of the summary and log.

pub mod artifacts;
pub mod cli;
pub mod digest;
pub mod engine;
pub mod error;
pub mod export;
pub mod features;
pub mod kpi;
pub mod model;
pub mod orchestrator;
pub mod reconcile;
pub mod store;
pub mod text_summary;
