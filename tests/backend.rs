//! End-to-end runs against an in-process fake backend.

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use forecast_viewer::engine::RunEngine;
use forecast_viewer::model::{InfoEvent, RunConfig, RunEvent};
use forecast_viewer::orchestrator::{build_view, run_controller, ControllerConfig, UiCommand};
use forecast_viewer::store::{RunStatus, RunStore};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
struct Fake {
    run_status: StatusCode,
    run_body: Value,
    run_delay: Duration,
    summary_status: StatusCode,
    summary_body: Value,
    seen: Arc<Mutex<Seen>>,
}

#[derive(Default)]
struct Seen {
    run_bodies: Vec<Value>,
    summary_queries: Vec<String>,
    summary_cache_control: Vec<String>,
}

impl Fake {
    fn new(run_body: Value, summary_body: Value) -> Self {
        Self {
            run_status: StatusCode::OK,
            run_body,
            run_delay: Duration::ZERO,
            summary_status: StatusCode::OK,
            summary_body,
            seen: Arc::default(),
        }
    }
}

async fn run_handler(State(fake): State<Fake>, Json(body): Json<Value>) -> impl IntoResponse {
    fake.seen.lock().unwrap().run_bodies.push(body);
    tokio::time::sleep(fake.run_delay).await;
    (fake.run_status, Json(fake.run_body.clone()))
}

async fn summary_handler(
    State(fake): State<Fake>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    {
        let mut seen = fake.seen.lock().unwrap();
        seen.summary_queries.push(query.unwrap_or_default());
        if let Some(v) = headers.get("cache-control").and_then(|v| v.to_str().ok()) {
            seen.summary_cache_control.push(v.to_string());
        }
    }
    (fake.summary_status, Json(fake.summary_body.clone()))
}

async fn serve(fake: Fake) -> String {
    let app = Router::new()
        .route("/run", post(run_handler))
        .route("/artifacts/summary.json", get(summary_handler))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config(base_url: &str, fast_mode: bool) -> RunConfig {
    RunConfig {
        base_url: base_url.to_string(),
        fast_mode,
        user_agent: "forecast-viewer-tests".into(),
        top_features: 10,
    }
}

fn run_body() -> Value {
    json!({
        "ok": true,
        "artifacts": ["fig_02_forecast.png", "fig_01_backtest.png", "summary.json"],
        "summary": {
            "single_anchor": {"rmse_1M": 1.0},
            "features": [{"feature": "a", "gain": 3}, {"feature": "b", "gain": 1}]
        },
        "stderr_tail": ["DATA_LAST=2024-05-31"],
        "stdout_tail": ["done"]
    })
}

fn drain(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn polled_summary_overrides_run_response() {
    let fake = Fake::new(
        run_body(),
        json!({
            "single_anchor": {"rmse_1M": 12.3},
            "features": {"c": {"gain": 9}}
        }),
    );
    let seen = fake.seen.clone();
    let base = serve(fake).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let run = RunEngine::new(config(&base, false)).unwrap().run(tx).await.unwrap();
    let view = build_view(run, &base);

    assert_eq!(view.kpis[0].value, "12.30");
    // A polled keyed object never replaces the baseline sequence.
    let names: Vec<_> = view.features.rows.iter().map(|r| r.row.feature.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(view.log.data_last.as_deref(), Some("2024-05-31"));
    assert_eq!(view.log.lines, ["DATA_LAST=2024-05-31", "done"]);

    let nonce = view.nonce.as_str().to_string();
    assert_eq!(
        view.figures.backtest.as_deref(),
        Some(format!("{base}/artifacts/fig_01_backtest.png?t={nonce}").as_str())
    );
    assert_eq!(
        view.figures.forecast.as_deref(),
        Some(format!("{base}/artifacts/fig_02_forecast.png?t={nonce}").as_str())
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen.run_bodies, [json!({"fast_mode": false})]);
    assert_eq!(seen.summary_queries, [format!("t={nonce}")]);
    assert_eq!(seen.summary_cache_control, ["no-store"]);
}

#[tokio::test]
async fn failed_poll_keeps_run_response() {
    let mut fake = Fake::new(run_body(), json!({"detail": "missing"}));
    fake.summary_status = StatusCode::NOT_FOUND;
    let base = serve(fake).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = RunEngine::new(config(&base, true)).unwrap().run(tx).await.unwrap();
    assert_eq!(run.fast_mode, Some(true));
    let view = build_view(run, &base);
    assert_eq!(view.kpis[0].value, "1.00");
    assert_eq!(view.features.rows.len(), 2);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::Info(InfoEvent::SummaryFetchFailed { .. })
    )));
}

#[tokio::test]
async fn run_error_status_is_a_hard_failure() {
    let mut fake = Fake::new(json!({"detail": "boom"}), json!({}));
    fake.run_status = StatusCode::INTERNAL_SERVER_ERROR;
    let seen = fake.seen.clone();
    let base = serve(fake).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = RunEngine::new(config(&base, true)).unwrap().run(tx).await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("run request failed"), "{msg}");
    assert!(msg.contains("500"), "{msg}");
    assert!(seen.lock().unwrap().summary_queries.is_empty());
}

#[tokio::test]
async fn backend_reported_failure_keeps_data() {
    let mut body = run_body();
    body["ok"] = json!(false);
    let base = serve(Fake::new(body, json!({}))).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = RunEngine::new(config(&base, true)).unwrap().run(tx).await.unwrap();
    assert!(!run.backend_ok);
    assert_eq!(run.artifacts.len(), 3);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, RunEvent::Info(InfoEvent::BackendReportedFailure))));
}

#[tokio::test]
async fn peek_reads_persisted_summary_only() {
    let fake = Fake::new(
        json!({}),
        json!({
            "figures": ["fig_01_a.png", "fig_02_b.png"],
            "metrics": {"rmse_3m": 4}
        }),
    );
    let seen = fake.seen.clone();
    let base = serve(fake).await;

    let run = RunEngine::new(config(&base, true)).unwrap().peek().await.unwrap();
    assert_eq!(run.fast_mode, None);
    let view = build_view(run, &base);
    assert_eq!(view.kpis[1].value, "4.00");
    assert!(view.figures.forecast.as_deref().unwrap().contains("fig_02_b.png"));
    assert!(seen.lock().unwrap().run_bodies.is_empty());
}

#[tokio::test]
async fn controller_runs_one_at_a_time_and_publishes() {
    let mut fake = Fake::new(run_body(), json!({}));
    fake.run_delay = Duration::from_millis(200);
    let seen = fake.seen.clone();
    let base = serve(fake).await;

    let cfg = ControllerConfig {
        run: config(&base, true),
        export_json: None,
    };
    let store = RunStore::new();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    cmd_tx.send(UiCommand::Run { fast_mode: Some(false) }).unwrap();
    cmd_tx.send(UiCommand::Run { fast_mode: None }).unwrap();
    cmd_tx.send(UiCommand::Quit).unwrap();

    run_controller(&cfg, &store, evt_tx, cmd_rx).await.unwrap();

    let snap = store.snapshot();
    assert_eq!(snap.generation, 1);
    assert_eq!(snap.status, RunStatus::Completed);
    assert_eq!(snap.view.unwrap().fast_mode, Some(false));

    let events = drain(&mut evt_rx);
    let started = events
        .iter()
        .filter(|e| matches!(e, RunEvent::RunStarted { .. }))
        .count();
    assert_eq!(started, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::Info(InfoEvent::RunAlreadyInFlight))));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunCompleted { generation: 1, .. })
    ));
    assert_eq!(seen.lock().unwrap().run_bodies.len(), 1);
}

#[tokio::test]
async fn controller_records_failed_run() {
    let mut fake = Fake::new(json!({}), json!({}));
    fake.run_status = StatusCode::BAD_GATEWAY;
    let base = serve(fake).await;

    let cfg = ControllerConfig {
        run: config(&base, true),
        export_json: None,
    };
    let store = RunStore::new();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    cmd_tx.send(UiCommand::Run { fast_mode: None }).unwrap();
    drop(cmd_tx);

    run_controller(&cfg, &store, evt_tx, cmd_rx).await.unwrap();

    assert!(matches!(store.snapshot().status, RunStatus::Failed(_)));
    assert!(drain(&mut evt_rx)
        .iter()
        .any(|e| matches!(e, RunEvent::RunFailed { generation: 1, .. })));
}
