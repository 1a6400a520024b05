use crate::digest::{LogDigest, SummaryDigest};
use crate::features::FeatureTable;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Local development backend used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    pub fast_mode: bool,
    pub user_agent: String,
    #[serde(default = "default_top_features")]
    pub top_features: usize,
}

fn default_top_features() -> usize {
    10
}

/// Open, versioned mapping of the fields the backend reports for a run.
///
/// No field is guaranteed to be present; accessors return `Option` and callers
/// decide how to degrade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Summary(Map<String, Value>);

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts only JSON objects; anything else is not a summary.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Walk nested objects, e.g. `["single_anchor", "rmse_1M"]`.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.0.get(*first)?;
        for key in rest {
            cur = cur.as_object()?.get(*key)?;
        }
        Some(cur)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

}

impl From<Map<String, Value>> for Summary {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Body of `POST /run`, as received. Never mutated after receipt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "RawRunResponse")]
pub struct RunResponse {
    pub ok: bool,
    pub artifacts: Vec<String>,
    pub summary: Option<Summary>,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
}

// Wire shape is loose: arrays may hold non-strings, fields may be null.
#[derive(Deserialize)]
struct RawRunResponse {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    artifacts: Option<Vec<Value>>,
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default)]
    stdout_tail: Option<Vec<Value>>,
    #[serde(default)]
    stderr_tail: Option<Vec<Value>>,
}

fn strings_only(values: Option<Vec<Value>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect()
}

impl From<RawRunResponse> for RunResponse {
    fn from(raw: RawRunResponse) -> Self {
        Self {
            ok: raw.ok.unwrap_or(false),
            artifacts: strings_only(raw.artifacts),
            summary: raw.summary.and_then(Summary::from_value),
            stdout_tail: strings_only(raw.stdout_tail),
            stderr_tail: strings_only(raw.stderr_tail),
        }
    }
}

impl RunResponse {
    /// Backend log tail: stderr first, then stdout.
    pub fn log_tail(&self) -> Vec<String> {
        self.stderr_tail
            .iter()
            .chain(self.stdout_tail.iter())
            .cloned()
            .collect()
    }
}

/// Per-run cache-busting value appended to every URL built for that run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunNonce(String);

impl RunNonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Unix milliseconds at the moment the run starts.
    pub fn generate() -> Self {
        let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self(millis.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigureSlot {
    Forecast,
    Backtest,
}

impl FigureSlot {
    pub const ALL: [FigureSlot; 2] = [FigureSlot::Forecast, FigureSlot::Backtest];

    pub fn as_str(self) -> &'static str {
        match self {
            FigureSlot::Forecast => "forecast",
            FigureSlot::Backtest => "backtest",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "forecast" => Some(FigureSlot::Forecast),
            "backtest" => Some(FigureSlot::Backtest),
            _ => None,
        }
    }
}

/// Resolved URL per slot. An empty slot is a valid, displayable state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFigures {
    pub forecast: Option<String>,
    pub backtest: Option<String>,
}

impl ClassifiedFigures {
    pub fn get(&self, slot: FigureSlot) -> Option<&str> {
        match slot {
            FigureSlot::Forecast => self.forecast.as_deref(),
            FigureSlot::Backtest => self.backtest.as_deref(),
        }
    }

    pub fn set(&mut self, slot: FigureSlot, url: String) {
        match slot {
            FigureSlot::Forecast => self.forecast = Some(url),
            FigureSlot::Backtest => self.backtest = Some(url),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.forecast.is_none() && self.backtest.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub feature: String,
    pub gain: f64,
    pub perm_rmse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceMetric {
    Gain,
    PermRmse,
}

impl ImportanceMetric {
    pub fn value_of(self, row: &FeatureRow) -> f64 {
        match self {
            ImportanceMetric::Gain => row.gain,
            ImportanceMetric::PermRmse => row.perm_rmse,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ImportanceMetric::Gain => "XGBoost gain",
            ImportanceMetric::PermRmse => "permutation RMSE increase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiKind {
    Rmse1M,
    Rmse3M,
    Trades1M,
    Trades3M,
    WinRate1M,
    WinRate3M,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kpi {
    pub kind: KpiKind,
    pub label: String,
    pub value: String,
    /// What the number means, for tooltips and `--json` consumers.
    pub help: String,
}

/// Everything a presentation layer needs for one completed run.
///
/// Built once per run and shared behind an `Arc`; never patched in place.
#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub timestamp_utc: String,
    pub base_url: String,
    pub nonce: RunNonce,
    /// `None` when the view was built from the persisted summary alone.
    pub fast_mode: Option<bool>,
    pub backend_ok: bool,
    pub artifacts: Vec<String>,
    pub summary: Summary,
    pub figures: ClassifiedFigures,
    pub features: FeatureTable,
    pub kpis: Vec<Kpi>,
    pub digest: SummaryDigest,
    pub log: LogDigest,
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        generation: u64,
        fast_mode: bool,
    },
    Info(InfoEvent),
    RunCompleted {
        generation: u64,
        view: Arc<RunView>,
    },
    RunFailed {
        generation: u64,
        error: String,
    },
}

/// Structured info events emitted by the engine and consumed by UI/CLI layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoEvent {
    Message(String),
    RunRequested { base_url: String, fast_mode: bool },
    SummaryFetchFailed { reason: String },
    BackendReportedFailure,
    RunAlreadyInFlight,
    StaleRunDiscarded { generation: u64 },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::RunRequested {
                base_url,
                fast_mode,
            } => {
                let mode = if *fast_mode { "fast" } else { "full" };
                format!("Starting {mode} run on {base_url}")
            }
            InfoEvent::SummaryFetchFailed { reason } => {
                format!("Could not read persisted summary, using run response: {reason}")
            }
            InfoEvent::BackendReportedFailure => {
                "Backend reported a failed run; check the log tail".to_string()
            }
            InfoEvent::RunAlreadyInFlight => {
                "A run is already in progress; wait for it to finish".to_string()
            }
            InfoEvent::StaleRunDiscarded { generation } => {
                format!("Discarded result of superseded run #{generation}")
            }
        }
    }
}

/// Read a JSON number or numeric string; `None` when absent or non-finite.
pub fn finite_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
