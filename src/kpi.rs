//! Headline KPIs derived from the canonical summary.

use crate::model::{finite_f64, Kpi, KpiKind, Summary};

/// Rendered when a KPI has no usable value.
pub const MISSING: &str = "—";

pub type FieldPath = &'static [&'static str];

const RMSE_1M: &[FieldPath] = &[
    &["single_anchor", "rmse_1M"],
    &["single_anchor_eval", "rmse_1m"],
    &["metrics", "rmse_1m"],
    &["single_anchor", "rmse1M"],
];
const RMSE_3M: &[FieldPath] = &[
    &["single_anchor", "rmse_3M"],
    &["single_anchor_eval", "rmse_3m"],
    &["metrics", "rmse_3m"],
    &["single_anchor", "rmse3M"],
];
const TRADES_1M: &[FieldPath] = &[&["fsm_1m", "n_trades"], &["fsm_1M", "n_trades"], &["trades_1m"]];
const TRADES_3M: &[FieldPath] = &[&["fsm_3m", "n_trades"], &["fsm_3M", "n_trades"], &["trades_3m"]];
const WIN_RATE_1M: &[FieldPath] = &[&["fsm_1m", "win_rate"], &["fsm_1M", "win_rate"], &["winrate_1m"]];
const WIN_RATE_3M: &[FieldPath] = &[&["fsm_3m", "win_rate"], &["fsm_3M", "win_rate"], &["winrate_3m"]];

impl KpiKind {
    pub const ALL: [KpiKind; 6] = [
        KpiKind::Rmse1M,
        KpiKind::Rmse3M,
        KpiKind::Trades1M,
        KpiKind::Trades3M,
        KpiKind::WinRate1M,
        KpiKind::WinRate3M,
    ];

    pub fn label(self) -> &'static str {
        match self {
            KpiKind::Rmse1M => "RMSE (1M)",
            KpiKind::Rmse3M => "RMSE (3M)",
            KpiKind::Trades1M => "Trades (1M)",
            KpiKind::Trades3M => "Trades (3M)",
            KpiKind::WinRate1M => "Win rate (1M)",
            KpiKind::WinRate3M => "Win rate (3M)",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            KpiKind::Rmse1M => {
                "Root-mean-square error of actual vs. predicted over the last month. Lower is better."
            }
            KpiKind::Rmse3M => {
                "Root-mean-square error over the last three months; shows longer-range stability."
            }
            KpiKind::Trades1M => {
                "Trades completed by the FSM strategy in the last month, entries and exits included."
            }
            KpiKind::Trades3M => {
                "Trades completed by the FSM strategy in the last three months."
            }
            KpiKind::WinRate1M => {
                "Share of profitable trades in the last month. Read it together with trade count and returns."
            }
            KpiKind::WinRate3M => "Share of profitable trades in the last three months.",
        }
    }

    /// Field aliases in lookup order; the first finite number wins.
    fn sources(self) -> &'static [FieldPath] {
        match self {
            KpiKind::Rmse1M => RMSE_1M,
            KpiKind::Rmse3M => RMSE_3M,
            KpiKind::Trades1M => TRADES_1M,
            KpiKind::Trades3M => TRADES_3M,
            KpiKind::WinRate1M => WIN_RATE_1M,
            KpiKind::WinRate3M => WIN_RATE_3M,
        }
    }

    fn format(self, value: Option<f64>) -> String {
        match self {
            KpiKind::Rmse1M | KpiKind::Rmse3M => match value {
                Some(v) => format!("{v:.2}"),
                None => MISSING.to_string(),
            },
            KpiKind::Trades1M | KpiKind::Trades3M => {
                // `+ 0.0` turns a rounded -0 into 0.
                format!("{:.0}", value.unwrap_or(0.0).round() + 0.0)
            }
            KpiKind::WinRate1M | KpiKind::WinRate3M => match value {
                Some(v) => format!("{:.0}%", (v * 100.0).round() + 0.0),
                None => MISSING.to_string(),
            },
        }
    }
}

/// First finite value along an ordered chain of field paths.
pub fn first_finite(summary: &Summary, paths: &[FieldPath]) -> Option<f64> {
    paths
        .iter()
        .find_map(|path| summary.lookup(path).and_then(finite_f64))
}

/// Derive the six headline KPIs, always in [`KpiKind::ALL`] order.
pub fn derive_kpis(summary: &Summary) -> Vec<Kpi> {
    KpiKind::ALL
        .iter()
        .map(|&kind| Kpi {
            kind,
            label: kind.label().to_string(),
            value: kind.format(first_finite(summary, kind.sources())),
            help: kind.help().to_string(),
        })
        .collect()
}
