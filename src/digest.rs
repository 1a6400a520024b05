//! Secondary summary views: trade stats, monthly extrema, daily forecast rows,
//! and a digest of the backend log tail.
//!
//! Like the KPIs, every field here degrades on its own. A malformed row is
//! skipped, a missing block is `None`, and nothing in this module fails.

use crate::model::{finite_f64, Summary};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

const MAX_SAMPLE_DATES: usize = 8;
const FSM_3M_HEADER: &str = "[FSM 3M";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStats {
    pub n_trades: u64,
    pub win_rate: Option<f64>,
    pub avg_trade_ret_pct: Option<f64>,
    pub total_ret_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyExtreme {
    pub month: String,
    pub hi_date: String,
    pub hi_price: Option<f64>,
    pub lo_date: String,
    pub lo_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyForecast {
    pub date: String,
    pub pred_close: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryDigest {
    pub anchor_date: Option<String>,
    pub fsm_1m: Option<TradeStats>,
    pub fsm_3m: Option<TradeStats>,
    pub monthly_extrema: Vec<MonthlyExtreme>,
    pub daily_forecast: Vec<DailyForecast>,
    pub figures_count: usize,
}

pub fn digest_summary(summary: &Summary) -> SummaryDigest {
    let anchor_date = ["anchor_eval", "anchor_date"]
        .iter()
        .find_map(|k| summary.lookup(&["single_anchor", *k]).and_then(text));

    SummaryDigest {
        anchor_date,
        fsm_1m: trade_stats(summary, &["fsm_1m", "fsm_1M"]),
        fsm_3m: trade_stats(summary, &["fsm_3m", "fsm_3M"]),
        monthly_extrema: rows(summary, "monthly_extrema", |row| MonthlyExtreme {
            month: field_text(row, &["Month", "month"]),
            hi_date: field_text(row, &["hi_date"]),
            hi_price: row.get("hi_price").and_then(finite_f64),
            lo_date: field_text(row, &["lo_date"]),
            lo_price: row.get("lo_price").and_then(finite_f64),
        }),
        daily_forecast: rows(summary, "future_3m_daily", |row| DailyForecast {
            date: field_text(row, &["date"]),
            pred_close: row.get("pred_close").and_then(finite_f64),
        }),
        figures_count: summary
            .get("figures")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
    }
}

fn trade_stats(summary: &Summary, keys: &[&str]) -> Option<TradeStats> {
    let block = keys
        .iter()
        .find_map(|k| summary.get(k).and_then(Value::as_object))?;
    let num = |k: &str| block.get(k).and_then(finite_f64);
    Some(TradeStats {
        n_trades: num("n_trades").map_or(0, |n| n.max(0.0).round() as u64),
        win_rate: num("win_rate"),
        avg_trade_ret_pct: num("avg_trade_ret_pct"),
        total_ret_pct: num("total_ret_pct"),
    })
}

fn rows<T>(summary: &Summary, key: &str, build: impl Fn(&Map<String, Value>) -> T) -> Vec<T> {
    summary
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).map(build).collect())
        .unwrap_or_default()
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_text(row: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| row.get(*k).and_then(text))
        .unwrap_or_default()
}

/// One row of the FSM 3M trade table printed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRow {
    pub entry_date: String,
    pub exit_date: String,
    pub side: String,
    pub hold_days: u32,
    pub ret_pct: f64,
    pub entry_px: f64,
    pub exit_px: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogDigest {
    pub lines: Vec<String>,
    pub data_last: Option<String>,
    pub anchor_date: Option<String>,
    pub sample_dates: Vec<String>,
    pub fsm_3m_trade: Option<TradeRow>,
}

struct LogPatterns {
    data_last: Regex,
    anchor: Regex,
    sample: Regex,
    trade: Regex,
}

fn patterns() -> &'static LogPatterns {
    static P: OnceLock<LogPatterns> = OnceLock::new();
    P.get_or_init(|| LogPatterns {
        data_last: Regex::new(r"DATA_LAST\s*=\s*([0-9\-]+)").expect("static regex"),
        anchor: Regex::new(r"ANCHOR_DATE\s*=\s*([0-9\-]+)").expect("static regex"),
        sample: Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+\d{4}\.\d+").expect("static regex"),
        trade: Regex::new(
            r"^\s*(\d{4}-\d{2}-\d{2})\s+(\d{4}-\d{2}-\d{2})\s+([A-Z]+)\s+(\d+)\s+[-\d.]+\s+([-\d.]+)\s+([-\d.]+)\s+([-\d.]+)",
        )
        .expect("static regex"),
    })
}

/// Digest the backend log tail (stderr lines first, then stdout).
pub fn digest_log(lines: Vec<String>) -> LogDigest {
    let p = patterns();

    let first_capture = |re: &Regex| {
        lines
            .iter()
            .find_map(|l| re.captures(l).map(|c| c[1].to_string()))
    };
    let data_last = first_capture(&p.data_last);
    let anchor_date = first_capture(&p.anchor);

    let sample_dates = lines
        .iter()
        .filter_map(|l| p.sample.captures(l).map(|c| c[1].to_string()))
        .take(MAX_SAMPLE_DATES)
        .collect();

    let fsm_3m_trade = lines
        .iter()
        .position(|l| l.contains(FSM_3M_HEADER))
        .and_then(|start| lines[start + 1..].iter().find_map(|l| parse_trade(&p.trade, l)));

    LogDigest {
        data_last,
        anchor_date,
        sample_dates,
        fsm_3m_trade,
        lines,
    }
}

fn parse_trade(re: &Regex, line: &str) -> Option<TradeRow> {
    let c = re.captures(line)?;
    Some(TradeRow {
        entry_date: c[1].to_string(),
        exit_date: c[2].to_string(),
        side: c[3].to_string(),
        hold_days: c[4].parse().ok()?,
        ret_pct: c[5].parse().ok()?,
        entry_px: c[6].parse().ok()?,
        exit_px: c[7].parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_reads_blocks_and_rows() {
        let s = Summary::from_value(json!({
            "single_anchor": {"anchor_date": "2024-05-31"},
            "fsm_1M": {"n_trades": 4, "win_rate": 0.5, "total_ret_pct": "0.031"},
            "monthly_extrema": [
                {"Month": "2024-06", "hi_date": "2024-06-12", "hi_price": 1020.5, "lo_date": "2024-06-03", "lo_price": "980"},
                "bad row",
                {"month": 202407, "hi_price": null}
            ],
            "future_3m_daily": [{"date": "2024-06-03", "pred_close": 990.1}],
            "figures": ["a.png", "b.png"]
        }))
        .unwrap();
        let d = digest_summary(&s);
        assert_eq!(d.anchor_date.as_deref(), Some("2024-05-31"));
        let f1 = d.fsm_1m.unwrap();
        assert_eq!(f1.n_trades, 4);
        assert_eq!(f1.total_ret_pct, Some(0.031));
        assert_eq!(f1.avg_trade_ret_pct, None);
        assert!(d.fsm_3m.is_none());
        assert_eq!(d.monthly_extrema.len(), 2);
        assert_eq!(d.monthly_extrema[0].lo_price, Some(980.0));
        assert_eq!(d.monthly_extrema[1].month, "202407");
        assert_eq!(d.monthly_extrema[1].hi_price, None);
        assert_eq!(d.daily_forecast[0].pred_close, Some(990.1));
        assert_eq!(d.figures_count, 2);
    }

    #[test]
    fn empty_summary_digest() {
        assert_eq!(digest_summary(&Summary::new()), SummaryDigest::default());
    }

    #[test]
    fn log_digest_extracts_markers() {
        let lines: Vec<String> = [
            "DATA_LAST = 2024-05-31",
            "ANCHOR_DATE=2024-04-30",
            "2024-05-29 1012.5000",
            "2024-05-30 1015.25",
            "[FSM 3M trades]",
            "entry exit side days x ret entry_px exit_px",
            "  2024-03-04  2024-03-18  LONG  10  0.0  0.042  950.0  989.9",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let d = digest_log(lines);
        assert_eq!(d.data_last.as_deref(), Some("2024-05-31"));
        assert_eq!(d.anchor_date.as_deref(), Some("2024-04-30"));
        assert_eq!(d.sample_dates, vec!["2024-05-29", "2024-05-30"]);
        let t = d.fsm_3m_trade.unwrap();
        assert_eq!(t.side, "LONG");
        assert_eq!(t.hold_days, 10);
        assert_eq!(t.ret_pct, 0.042);
        assert_eq!(t.exit_px, 989.9);
        assert_eq!(d.lines.len(), 7);
    }

    #[test]
    fn trade_rows_before_header_are_ignored() {
        let lines = vec![
            "2024-03-04 2024-03-18 LONG 10 0.0 0.042 950.0 989.9".to_string(),
            "[FSM 3M]".to_string(),
        ];
        assert!(digest_log(lines).fsm_3m_trade.is_none());
    }
}
