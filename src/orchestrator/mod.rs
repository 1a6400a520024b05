//! Application-level orchestration.
//!
//! This module owns the run lifecycle (start, single-flight guard, publish) and
//! post-run processing: view derivation and exports. CLI layers call into it and
//! read results back from the [`crate::store::RunStore`].

mod controller;
mod post_process;

pub use controller::{run_controller, ControllerConfig, UiCommand};
pub use post_process::{build_view, process_run_completion, ProcessedRun};
