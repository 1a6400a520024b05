use crate::engine::{ReconciledRun, RunEngine};
use crate::model::{RunConfig, RunEvent, RunView, DEFAULT_BASE_URL};
use crate::orchestrator::{build_view, run_controller, ControllerConfig, UiCommand};
use crate::store::{RunStatus, RunStore};
use crate::text_summary::build_text_summary;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "forecast-viewer",
    version,
    about = "Trigger forecast runs and view reconciled results"
)]
pub struct Cli {
    /// Base URL of the forecasting backend
    #[arg(long, env = "FORECAST_API_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Use --fast-mode true or --fast-mode false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub fast_mode: bool,

    /// Print JSON result and exit
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (default)
    #[arg(long, conflicts_with = "json")]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Also print the reconciled summary object (alone, in JSON mode)
    #[arg(long)]
    pub raw_summary: bool,

    /// Include the backend log tail in text output
    #[arg(long)]
    pub show_log: bool,

    /// Number of feature rows shown in text output
    #[arg(long, default_value_t = 10)]
    pub top_features: usize,

    /// Show the persisted summary without triggering a run
    #[arg(long, conflicts_with = "interactive")]
    pub peek: bool,

    /// Read commands from stdin (r/run, fast on|off, q)
    #[arg(long)]
    pub interactive: bool,

    /// Export the reconciled view as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.interactive {
        return run_interactive(args).await;
    }

    run_once(args).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.trim_end_matches('/').to_string(),
        fast_mode: args.fast_mode,
        user_agent: format!("forecast-viewer/{}", env!("CARGO_PKG_VERSION")),
        top_features: args.top_features,
    }
}

/// Single run (or peek), render, exit.
async fn run_once(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let engine = RunEngine::new(cfg.clone())?;
    let run: ReconciledRun = if args.peek {
        engine.peek().await?
    } else {
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
        let handle = tokio::spawn(async move { engine.run(evt_tx).await });

        while let Some(ev) = evt_rx.recv().await {
            if let (Some(tx), RunEvent::Info(info)) = (out_tx.as_ref(), ev) {
                let _ = tx.send(OutputLine::Stderr(info.to_message()));
            }
        }

        handle.await.context("run task failed")??
    };

    let view = build_view(run, &cfg.base_url);
    handle_exports(&args, &view)?;

    if let Some(tx) = out_tx.as_ref() {
        for line in render(&args, &view, cfg.top_features)? {
            let _ = tx.send(line);
        }
        if let Some(p) = args.export_json.as_deref() {
            let _ = tx.send(OutputLine::Stderr(format!("Exported JSON: {}", p.display())));
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(())
}

fn render(args: &Cli, view: &RunView, top_features: usize) -> Result<Vec<OutputLine>> {
    let mut out = Vec::new();
    if args.json {
        let body = if args.raw_summary {
            serde_json::to_string_pretty(&view.summary)?
        } else {
            serde_json::to_string_pretty(view)?
        };
        out.push(OutputLine::Stdout(body));
        return Ok(out);
    }

    let summary = build_text_summary(view, top_features, args.show_log);
    out.extend(summary.lines.into_iter().map(OutputLine::Stdout));
    if args.raw_summary {
        out.push(OutputLine::Stdout("Raw summary:".to_string()));
        out.push(OutputLine::Stdout(serde_json::to_string_pretty(&view.summary)?));
    }
    Ok(out)
}

/// A parsed line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InputCommand {
    Run,
    Fast(bool),
    Quit,
    Help,
    Unknown(String),
}

fn parse_input(line: &str) -> Option<InputCommand> {
    let mut words = line.split_whitespace();
    let cmd = words.next()?.to_ascii_lowercase();
    let arg = words.next().map(str::to_ascii_lowercase);
    Some(match (cmd.as_str(), arg.as_deref()) {
        ("r" | "run", _) => InputCommand::Run,
        ("fast", Some("on" | "true" | "1")) => InputCommand::Fast(true),
        ("fast", Some("off" | "false" | "0")) => InputCommand::Fast(false),
        ("q" | "quit" | "exit", _) => InputCommand::Quit,
        ("h" | "help" | "?", _) => InputCommand::Help,
        _ => InputCommand::Unknown(line.trim().to_string()),
    })
}

const INTERACTIVE_HELP: &str = "Commands: r | run, fast on | fast off, q | quit, help";

async fn run_interactive(args: Cli) -> Result<()> {
    let cfg = ControllerConfig {
        run: build_config(&args),
        export_json: args.export_json.clone(),
    };
    let store = RunStore::new();
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // Progress and failures come from the event stream.
    let events_out = out_tx.clone();
    let events = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            let msg = match ev {
                RunEvent::RunStarted {
                    generation,
                    fast_mode,
                } => {
                    let mode = if fast_mode { "fast" } else { "full" };
                    format!("== run #{generation} ({mode}) ==")
                }
                RunEvent::Info(info) => info.to_message(),
                RunEvent::RunCompleted { generation, .. } => format!("Run #{generation} completed"),
                RunEvent::RunFailed { generation, error } => {
                    format!("Run #{generation} failed: {error}")
                }
            };
            let _ = events_out.send(OutputLine::Stderr(msg));
        }
    });

    // Completed views are rendered from the store.
    let mut state_rx = store.subscribe();
    let view_out = out_tx.clone();
    let (top, show_log) = (cfg.run.top_features, args.show_log);
    let views = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            if let (RunStatus::Completed, Some(view)) = (&state.status, state.view.as_ref()) {
                for line in build_text_summary(view, top, show_log).lines {
                    let _ = view_out.send(OutputLine::Stdout(line));
                }
            }
        }
    });

    let input_out = out_tx.clone();
    let mut fast_mode = cfg.run.fast_mode;
    let input = tokio::spawn(async move {
        let _ = input_out.send(OutputLine::Stderr(INTERACTIVE_HELP.to_string()));
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let cmd = match parse_input(&line) {
                Some(InputCommand::Run) => UiCommand::Run {
                    fast_mode: Some(fast_mode),
                },
                Some(InputCommand::Fast(on)) => {
                    fast_mode = on;
                    let state = if on { "on" } else { "off" };
                    let _ = input_out.send(OutputLine::Stderr(format!("Fast mode {state}")));
                    continue;
                }
                Some(InputCommand::Quit) => break,
                Some(InputCommand::Help) => {
                    let _ = input_out.send(OutputLine::Stderr(INTERACTIVE_HELP.to_string()));
                    continue;
                }
                Some(InputCommand::Unknown(raw)) => {
                    let _ = input_out.send(OutputLine::Stderr(format!(
                        "Unknown command: {raw}. {INTERACTIVE_HELP}"
                    )));
                    continue;
                }
                None => continue,
            };
            if cmd_tx.send(cmd).is_err() {
                break;
            }
        }
        let _ = cmd_tx.send(UiCommand::Quit);
    });

    let result = run_controller(&cfg, &store, evt_tx, cmd_rx).await;

    input.abort();
    drop(store);
    let _ = events.await;
    let _ = views.await;
    drop(out_tx);
    let _ = out_handle.await;
    result
}

/// Handle export operations for one-shot modes; errors propagate.
fn handle_exports(args: &Cli, view: &RunView) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::export::export_json(p, view)?;
    }
    Ok(())
}
