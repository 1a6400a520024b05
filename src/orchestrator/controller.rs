//! Run lifecycle controller.
//!
//! Owns run start and completion, keeps at most one run in flight, and
//! publishes finished views into the [`RunStore`].

use crate::engine::{ReconciledRun, RunEngine};
use crate::model::{InfoEvent, RunConfig, RunEvent};
use crate::orchestrator::post_process::process_run_completion;
use crate::store::RunStore;
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub enum UiCommand {
    /// Start a run; `None` keeps the configured mode.
    Run { fast_mode: Option<bool> },
    Quit,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub run: RunConfig,
    pub export_json: Option<PathBuf>,
}

/// Internal handle for a running task.
struct RunCtx {
    generation: u64,
    handle: Option<tokio::task::JoinHandle<Result<ReconciledRun>>>,
}

fn start_run(
    cfg: &ControllerConfig,
    fast_mode: Option<bool>,
    store: &RunStore,
    event_tx: &UnboundedSender<RunEvent>,
) -> RunCtx {
    let mut run_cfg = cfg.run.clone();
    if let Some(fast) = fast_mode {
        run_cfg.fast_mode = fast;
    }
    let generation = store.begin_run();
    let _ = event_tx.send(RunEvent::RunStarted {
        generation,
        fast_mode: run_cfg.fast_mode,
    });

    let tx = event_tx.clone();
    let handle = tokio::spawn(async move { RunEngine::new(run_cfg)?.run(tx).await });
    RunCtx {
        generation,
        handle: Some(handle),
    }
}

/// Serve UI commands until `Quit` (or the command channel closes) and no run is in flight.
pub async fn run_controller(
    cfg: &ControllerConfig,
    store: &RunStore,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_ctx: Option<RunCtx> = None;
    let mut quit_pending = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Run { fast_mode }) => {
                        // One run at a time: a second trigger is refused, not queued.
                        if run_ctx.is_some() {
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::RunAlreadyInFlight));
                        } else {
                            run_ctx = Some(start_run(cfg, fast_mode, store, &event_tx));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // No cancellation: an in-flight run finishes before we leave.
                        quit_pending = true;
                        if run_ctx.is_none() {
                            break;
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                let Some(join_res) = maybe_done else { continue };
                let Some(ctx) = run_ctx.take() else { continue };
                let generation = ctx.generation;
                match join_res {
                    Ok(Ok(run)) => {
                        let processed = process_run_completion(
                            &cfg.run.base_url,
                            cfg.export_json.as_deref(),
                            run,
                        );
                        for msg in processed.export_messages {
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(msg)));
                        }
                        if store.publish(generation, processed.view.clone()) {
                            let _ = event_tx.send(RunEvent::RunCompleted {
                                generation,
                                view: processed.view,
                            });
                        } else {
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::StaleRunDiscarded {
                                generation,
                            }));
                        }
                    }
                    Ok(Err(e)) => {
                        let error = format!("{e:#}");
                        tracing::error!(generation, "run failed: {error}");
                        store.fail(generation, error.clone());
                        let _ = event_tx.send(RunEvent::RunFailed { generation, error });
                    }
                    Err(e) => {
                        let error = format!("run task failed: {e}");
                        store.fail(generation, error.clone());
                        let _ = event_tx.send(RunEvent::RunFailed { generation, error });
                    }
                }
                if quit_pending {
                    break;
                }
            }
        }
    }

    Ok(())
}
