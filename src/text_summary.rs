//! Text summary builder for CLI output.
//!
//! Formats a [`RunView`] into human-readable lines for text mode.

use crate::digest::TradeStats;
use crate::model::{FigureSlot, RunView};

/// Pre-formatted lines for text output.
pub struct TextSummary {
    pub lines: Vec<String>,
}

fn opt_num(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(x) => format!("{x:.decimals$}"),
        None => crate::kpi::MISSING.to_string(),
    }
}

fn trade_line(label: &str, stats: &TradeStats) -> String {
    let win = stats
        .win_rate
        .map(|w| format!("{:.0}%", (w * 100.0).round() + 0.0))
        .unwrap_or_else(|| crate::kpi::MISSING.to_string());
    format!(
        "{label}: trades {} win {win} avg {}% total {}%",
        stats.n_trades,
        opt_num(stats.avg_trade_ret_pct, 2),
        opt_num(stats.total_ret_pct, 2),
    )
}

/// Build a text summary for one run view.
pub fn build_text_summary(view: &RunView, top_features: usize, show_log: bool) -> TextSummary {
    let mut lines = Vec::new();

    let mode = match view.fast_mode {
        Some(true) => "fast",
        Some(false) => "full",
        None => "persisted",
    };
    lines.push(format!(
        "Run {} ({mode}) at {} from {}",
        view.nonce, view.timestamp_utc, view.base_url
    ));
    if !view.backend_ok {
        lines.push("Backend reported the run as failed; results may be partial.".to_string());
    }

    if view.summary.is_empty() {
        lines.push("No summary data yet.".to_string());
    }

    for kpi in &view.kpis {
        lines.push(format!("{:<18} {}", format!("{}:", kpi.label), kpi.value));
    }

    let d = &view.digest;
    if let Some(anchor) = d.anchor_date.as_deref() {
        lines.push(format!("Anchor date: {anchor}"));
    }
    if let Some(s) = d.fsm_1m.as_ref() {
        lines.push(trade_line("FSM 1M", s));
    }
    if let Some(s) = d.fsm_3m.as_ref() {
        lines.push(trade_line("FSM 3M", s));
    }

    for slot in FigureSlot::ALL {
        if let Some(url) = view.figures.get(slot) {
            lines.push(format!("Figure ({}): {url}", slot.as_str()));
        }
    }
    if view.figures.is_empty() && !view.artifacts.is_empty() {
        lines.push(format!(
            "No figure classified among {} artifact(s)",
            view.artifacts.len()
        ));
    }

    if !d.monthly_extrema.is_empty() {
        lines.push("Monthly extrema:".to_string());
        for m in &d.monthly_extrema {
            lines.push(format!(
                "  {}  high {} on {}  low {} on {}",
                m.month,
                opt_num(m.hi_price, 2),
                m.hi_date,
                opt_num(m.lo_price, 2),
                m.lo_date
            ));
        }
    }
    if !d.daily_forecast.is_empty() {
        lines.push("Daily forecast:".to_string());
        for f in &d.daily_forecast {
            lines.push(format!("  {}  {}", f.date, opt_num(f.pred_close, 2)));
        }
    }

    let table = &view.features;
    if !table.is_empty() {
        lines.push(format!(
            "Top features by {} ({} total):",
            table.metric.display_name(),
            table.rows.len()
        ));
        for (i, rank) in table.top(top_features).iter().enumerate() {
            let value = table.metric.value_of(&rank.row);
            let name = if rank.label == rank.row.feature {
                rank.label.clone()
            } else {
                format!("{} [{}]", rank.label, rank.row.feature)
            };
            lines.push(format!(
                "  {:>2}. {name}  {}  {:.1}%",
                i + 1,
                opt_num(value.is_finite().then_some(value), 4),
                rank.share_pct
            ));
            lines.push(format!("      {}", rank.description));
        }
    }

    let log = &view.log;
    if let Some(data_last) = log.data_last.as_deref() {
        lines.push(format!("Data through: {data_last}"));
    }
    if d.anchor_date.is_none() {
        if let Some(anchor) = log.anchor_date.as_deref() {
            lines.push(format!("Anchor date (log): {anchor}"));
        }
    }
    if !log.sample_dates.is_empty() {
        lines.push(format!("Sample dates: {}", log.sample_dates.join(", ")));
    }
    if let Some(t) = log.fsm_3m_trade.as_ref() {
        lines.push(format!(
            "Last FSM 3M trade: {} -> {} {} {}d ret {:.2}% ({:.2} -> {:.2})",
            t.entry_date, t.exit_date, t.side, t.hold_days, t.ret_pct, t.entry_px, t.exit_px
        ));
    }
    if show_log && !log.lines.is_empty() {
        lines.push("Log tail:".to_string());
        lines.extend(log.lines.iter().map(|l| format!("  {l}")));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReconciledRun;
    use crate::model::{RunNonce, Summary};
    use crate::orchestrator::build_view;
    use serde_json::json;

    fn view_of(summary: serde_json::Value, ok: bool, log: &[&str]) -> RunView {
        build_view(
            ReconciledRun {
                nonce: RunNonce::new("1"),
                fast_mode: Some(false),
                backend_ok: ok,
                artifacts: vec!["fig_01_a.png".into(), "fig_02_b.png".into()],
                summary: Summary::from_value(summary).unwrap(),
                log_tail: log.iter().map(|s| s.to_string()).collect(),
            },
            "http://h",
        )
    }

    #[test]
    fn empty_summary_reports_no_data() {
        let s = build_text_summary(&view_of(json!({}), true, &[]), 10, false);
        assert!(s.lines.iter().any(|l| l == "No summary data yet."));
        assert!(s.lines.iter().any(|l| l.contains("RMSE") && l.ends_with('—')));
    }

    #[test]
    fn features_use_catalog_labels_and_limit() {
        let summary = json!({"features": [
            {"feature": "ret_1d", "gain": 3},
            {"feature": "zzz", "gain": 1},
        ]});
        let s = build_text_summary(&view_of(summary, true, &[]), 1, false);
        let at = s
            .lines
            .iter()
            .position(|l| l.starts_with("Top features"))
            .unwrap();
        let rows = &s.lines[at + 1..];
        assert!(rows[0].contains("1-day return [ret_1d]"));
        assert!(rows[0].ends_with("75.0%"));
        assert_eq!(
            rows[1].trim(),
            "Return over one trading day, the shortest momentum signal."
        );
        assert!(!rows.iter().any(|l| l.contains("zzz")));
    }

    #[test]
    fn failed_backend_and_log_tail_are_shown() {
        let s = build_text_summary(&view_of(json!({}), false, &["boom"]), 10, true);
        assert!(s.lines.iter().any(|l| l.starts_with("Backend reported")));
        assert_eq!(s.lines.last().map(String::as_str), Some("  boom"));
    }
}
