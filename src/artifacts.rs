//! Figure classification: decide which image is the forecast and which is the backtest.
//!
//! Classification runs in two steps. [`categorize`] looks at one filename in
//! isolation; [`assign_slots`] turns a set of categorized candidates into at
//! most one file per slot. A backend-supplied figure map, when present,
//! bypasses both.

use crate::model::{ClassifiedFigures, FigureSlot, RunNonce, Summary};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Summary keys that may carry an explicit `{slot: [paths..]}` map.
const FIGURE_MAP_KEYS: [&str; 2] = ["figure_map", "figures"];

const FEATURE_IMPORTANCE_MARKERS: [&str; 4] =
    ["importance", "feat_imp", "feature-imp", "shap"];

const FORECAST_KEYWORDS: [&str; 6] = ["forecast", "predict", "future", "next", "freeze_exog", "proj"];
const BACKTEST_KEYWORDS: [&str; 7] = ["backtest", "vs", "actual", "rmse", "trigger", "hist", "train"];

const KEYWORD_SCORE: u8 = 3;
const INDEX_SCORE: u8 = 2;

/// Builds run-scoped URLs for files under `/artifacts/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUrls {
    base_url: String,
    nonce: RunNonce,
}

impl ArtifactUrls {
    pub fn new(base_url: &str, nonce: RunNonce) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            nonce,
        }
    }

    /// Resolve a raw artifact name, path or URL to a displayable URL.
    ///
    /// Relative inputs keep only their final path segment. Absolute URLs are
    /// left as-is apart from the nonce.
    pub fn resolve(&self, raw: &str) -> String {
        let raw = raw.trim();
        let nonce = urlencoding::encode(self.nonce.as_str());
        if is_absolute_url(raw) {
            let sep = if raw.contains('?') { '&' } else { '?' };
            return format!("{raw}{sep}t={nonce}");
        }
        format!(
            "{}/artifacts/{}?t={nonce}",
            self.base_url,
            urlencoding::encode(file_name(raw))
        )
    }

    pub fn summary(&self) -> String {
        self.resolve("summary.json")
    }
}

fn is_absolute_url(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn file_name(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFamily {
    Figure,
    FeatureImportance,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHint {
    pub slot: FigureSlot,
    pub confidence: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Categorized {
    pub family: ArtifactFamily,
    /// Two-digit sequence number, e.g. `01` in `fig_01_backtest.png`.
    pub index: Option<u32>,
    pub hint: Option<SlotHint>,
}

// `fig`/`figure` as a whole token, so `config_dump.png` is not a figure.
fn figure_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[_.\-])fig(?:ure)?(?:[_.\-]|\d|$)").expect("static regex"))
}

fn index_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_(\d{2})(?:_|\.)").expect("static regex"))
}

/// Categorize one artifact by name alone.
pub fn categorize(name: &str) -> Categorized {
    let lower = file_name(name).to_ascii_lowercase();

    let family = if FEATURE_IMPORTANCE_MARKERS.iter().any(|m| lower.contains(m)) {
        ArtifactFamily::FeatureImportance
    } else if figure_pattern().is_match(&lower) {
        ArtifactFamily::Figure
    } else {
        ArtifactFamily::Other
    };

    let index = index_pattern()
        .captures(&lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    let mut forecast = 0u8;
    let mut backtest = 0u8;
    if FORECAST_KEYWORDS.iter().any(|k| lower.contains(k)) {
        forecast += KEYWORD_SCORE;
    }
    if BACKTEST_KEYWORDS.iter().any(|k| lower.contains(k)) {
        backtest += KEYWORD_SCORE;
    }
    match index {
        Some(2) => forecast += INDEX_SCORE,
        Some(1) => backtest += INDEX_SCORE,
        _ => {}
    }
    let hint = match forecast.cmp(&backtest) {
        std::cmp::Ordering::Greater => Some(SlotHint {
            slot: FigureSlot::Forecast,
            confidence: forecast,
        }),
        std::cmp::Ordering::Less => Some(SlotHint {
            slot: FigureSlot::Backtest,
            confidence: backtest,
        }),
        std::cmp::Ordering::Equal => None,
    };

    Categorized {
        family,
        index,
        hint,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub name: &'a str,
    pub category: Categorized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotAssignment<'a> {
    pub forecast: Option<&'a str>,
    pub backtest: Option<&'a str>,
}

/// Assign figure candidates to slots.
///
/// With two or more indexed candidates the lowest index is the backtest and the
/// highest the forecast, since the backtest figure is written first. Without
/// usable indices the keyword hints pick the strongest candidate per slot over
/// all candidates; a slot nobody claims takes a positional leftover.
pub fn assign_slots<'a>(candidates: &[Candidate<'a>]) -> SlotAssignment<'a> {
    let mut sorted: Vec<Candidate<'a>> = candidates.to_vec();
    sorted.sort_by(|a, b| file_name(a.name).cmp(file_name(b.name)).then(a.name.cmp(b.name)));
    sorted.dedup_by(|a, b| a.name == b.name);

    match sorted.len() {
        0 => return SlotAssignment::default(),
        1 => {
            return SlotAssignment {
                forecast: Some(sorted[0].name),
                backtest: Some(sorted[0].name),
            }
        }
        _ => {}
    }

    let mut indexed: Vec<(u32, Candidate<'a>)> = sorted
        .iter()
        .filter_map(|c| c.category.index.map(|i| (i, *c)))
        .collect();
    if indexed.len() >= 2 {
        // `sorted` is already name-ordered, so a stable sort on the index is enough.
        indexed.sort_by_key(|(i, _)| *i);
        return SlotAssignment {
            backtest: indexed.first().map(|(_, c)| c.name),
            forecast: indexed.last().map(|(_, c)| c.name),
        };
    }

    let mut out = SlotAssignment {
        forecast: strongest(&sorted, FigureSlot::Forecast),
        backtest: strongest(&sorted, FigureSlot::Backtest),
    };
    if out.backtest.is_none() {
        out.backtest = sorted.iter().map(|c| c.name).find(|n| Some(*n) != out.forecast);
    }
    if out.forecast.is_none() {
        out.forecast = sorted
            .iter()
            .rev()
            .map(|c| c.name)
            .find(|n| Some(*n) != out.backtest);
    }
    out
}

fn strongest<'a>(sorted: &[Candidate<'a>], slot: FigureSlot) -> Option<&'a str> {
    let mut best: Option<(u8, &'a str)> = None;
    for c in sorted {
        let Some(hint) = c.category.hint.filter(|h| h.slot == slot) else {
            continue;
        };
        if best.map_or(true, |(score, _)| hint.confidence > score) {
            best = Some((hint.confidence, c.name));
        }
    }
    best.map(|(_, name)| name)
}

/// Resolve the forecast and backtest figures for a run.
///
/// `fallback` is the raw artifact list from the run response; it is only used
/// when the summary carries no usable figure map.
pub fn classify(summary: &Summary, fallback: &[String], urls: &ArtifactUrls) -> ClassifiedFigures {
    if let Some(figures) = from_figure_map(summary, urls) {
        return figures;
    }

    let pngs: Vec<&str> = fallback
        .iter()
        .map(|s| s.trim())
        .filter(|s| s.to_ascii_lowercase().ends_with(".png"))
        .collect();

    let candidates: Vec<Candidate<'_>> = pngs
        .iter()
        .copied()
        .map(|name| Candidate {
            name,
            category: categorize(name),
        })
        .filter(|c| c.category.family == ArtifactFamily::Figure)
        .collect();

    let assignment = if candidates.is_empty() {
        positional(&pngs)
    } else {
        assign_slots(&candidates)
    };

    ClassifiedFigures {
        forecast: assignment.forecast.map(|n| urls.resolve(n)),
        backtest: assignment.backtest.map(|n| urls.resolve(n)),
    }
}

fn positional<'a>(pngs: &[&'a str]) -> SlotAssignment<'a> {
    let mut sorted = pngs.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    SlotAssignment {
        backtest: sorted.first().copied(),
        forecast: sorted.get(1).copied(),
    }
}

fn from_figure_map(summary: &Summary, urls: &ArtifactUrls) -> Option<ClassifiedFigures> {
    let map = FIGURE_MAP_KEYS
        .iter()
        .find_map(|k| summary.get(k).and_then(Value::as_object))?;

    let mut figures = ClassifiedFigures::default();
    for (key, entries) in map {
        let Some(slot) = FigureSlot::from_key(key) else {
            continue;
        };
        if let Some(latest) = latest_entry(entries) {
            figures.set(slot, urls.resolve(latest));
        }
    }
    (!figures.is_empty()).then_some(figures)
}

// Entries are in write order; the last one is the freshest.
fn latest_entry(entries: &Value) -> Option<&str> {
    match entries {
        Value::Array(items) => items
            .iter()
            .rev()
            .filter_map(Value::as_str)
            .find(|s| !s.trim().is_empty()),
        Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
        _ => None,
    }
}
