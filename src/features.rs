//! Feature-importance normalization.
//!
//! Three payload shapes have shipped over time: a bare row list, `{items: [..]}`
//! and `{main_top20: [..]}`. All of them end up as [`FeatureRow`]s ranked by an
//! auto-selected metric, with each row's share of the full-set total.

use crate::model::{FeatureRow, ImportanceMetric, Summary};
use crate::reconcile::FEATURES_KEY;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

const WRAPPER_KEYS: [&str; 2] = ["items", "main_top20"];

/// Sums below this are treated as "the backend did not fill this metric".
const NEGLIGIBLE_SUM: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRank {
    #[serde(flatten)]
    pub row: FeatureRow,
    pub label: String,
    pub description: &'static str,
    /// Share of the selected metric over all rows, in percent.
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureTable {
    pub metric: ImportanceMetric,
    pub rows: Vec<FeatureRank>,
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self {
            metric: ImportanceMetric::Gain,
            rows: Vec::new(),
        }
    }
}

impl FeatureTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `n` ranked rows. Shares are not recomputed for the subset.
    pub fn top(&self, n: usize) -> &[FeatureRank] {
        &self.rows[..n.min(self.rows.len())]
    }
}

/// Normalize the summary's feature payload into ranked rows.
pub fn normalize(summary: &Summary) -> FeatureTable {
    let Some(elements) = summary.get(FEATURES_KEY).and_then(locate_rows) else {
        return FeatureTable::default();
    };

    let rows = parse_rows(elements);
    if rows.is_empty() {
        return FeatureTable::default();
    }

    let metric = select_metric(&rows);
    let total: f64 = rows.iter().map(|r| finite_or_zero(metric.value_of(r))).sum();

    let mut ranked: Vec<FeatureRank> = rows
        .into_iter()
        .map(|row| {
            let v = metric.value_of(&row);
            let share_pct = if total != 0.0 && v.is_finite() {
                v / total * 100.0
            } else {
                0.0
            };
            let (label, description) = feature_meta(&row.feature);
            FeatureRank {
                row,
                label,
                description,
                share_pct,
            }
        })
        .collect();

    // sort_by is stable: equal values keep payload order.
    ranked.sort_by(|a, b| sort_key(metric, &b.row).total_cmp(&sort_key(metric, &a.row)));

    FeatureTable {
        metric,
        rows: ranked,
    }
}

fn locate_rows(payload: &Value) -> Option<&Vec<Value>> {
    if let Value::Array(rows) = payload {
        if !rows.is_empty() {
            return Some(rows);
        }
    }
    let obj = payload.as_object()?;
    WRAPPER_KEYS
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_array))
        .find(|rows| !rows.is_empty())
}

fn parse_rows(elements: &[Value]) -> Vec<FeatureRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(elements.len());
    for el in elements {
        let Some(obj) = el.as_object() else {
            continue;
        };
        let name = ["feature", "name"]
            .iter()
            .filter_map(|k| obj.get(*k).and_then(Value::as_str))
            .find(|s| !s.is_empty());
        let Some(name) = name else {
            continue;
        };
        let gain = metric_field(obj.get("gain"));
        let perm_rmse = metric_field(obj.get("perm_rmse"));
        if !gain.is_finite() && !perm_rmse.is_finite() {
            continue;
        }
        if !seen.insert(name.to_string()) {
            continue;
        }
        rows.push(FeatureRow {
            feature: name.to_string(),
            gain,
            perm_rmse,
        });
    }
    rows
}

/// Missing or null → 0, unparsable → NaN.
fn metric_field(value: Option<&Value>) -> f64 {
    match value {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    }
}

fn select_metric(rows: &[FeatureRow]) -> ImportanceMetric {
    let gain: f64 = rows.iter().map(|r| finite_or_zero(r.gain)).sum();
    let perm: f64 = rows.iter().map(|r| finite_or_zero(r.perm_rmse)).sum();
    if gain.abs() < NEGLIGIBLE_SUM && perm > 0.0 {
        ImportanceMetric::PermRmse
    } else {
        ImportanceMetric::Gain
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn sort_key(metric: ImportanceMetric, row: &FeatureRow) -> f64 {
    let v = metric.value_of(row);
    if v.is_finite() {
        v
    } else {
        f64::NEG_INFINITY
    }
}

/// Display metadata for a feature key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMeta {
    pub label: &'static str,
    pub description: &'static str,
}

const FEATURE_CATALOG: &[(&str, FeatureMeta)] = &[
    (
        "Foreign_big_sell",
        FeatureMeta {
            label: "Foreign net selling",
            description: "Daily net selling by foreign investors; gauges international selling pressure.",
        },
    ),
    (
        "TSM_return",
        FeatureMeta {
            label: "TSM daily return",
            description: "Change of the ADR price versus the previous session.",
        },
    ),
    (
        "TSM_gap_return",
        FeatureMeta {
            label: "TSM gap return",
            description: "Open versus previous close; captures overnight gaps.",
        },
    ),
    (
        "ret_1d",
        FeatureMeta {
            label: "1-day return",
            description: "Return over one trading day, the shortest momentum signal.",
        },
    ),
    (
        "SOX_return",
        FeatureMeta {
            label: "SOX index return",
            description: "Daily return of the semiconductor index; reflects sector sentiment.",
        },
    ),
    (
        "range20_ratio",
        FeatureMeta {
            label: "20-day range position",
            description: "Where price sits inside its 20-day high/low range; near 1 means near the top.",
        },
    ),
    (
        "ret_5d",
        FeatureMeta {
            label: "5-day return",
            description: "Cumulative return over the last five sessions.",
        },
    ),
    (
        "pos_3M",
        FeatureMeta {
            label: "3-month position",
            description: "Relative position of price inside its 3-month range.",
        },
    ),
    (
        "return_lag1",
        FeatureMeta {
            label: "Lagged return",
            description: "Previous period's return, used as momentum carry-over.",
        },
    ),
    (
        "gap_5d",
        FeatureMeta {
            label: "5-day gap size",
            description: "Gap activity over the last five sessions.",
        },
    ),
];

const GENERIC_DESCRIPTION: &str =
    "Contributes to the forecast; larger values mean higher relative importance.";

/// Look up display metadata; unknown keys use the key itself as label.
pub fn feature_meta(key: &str) -> (String, &'static str) {
    match FEATURE_CATALOG.iter().find(|(k, _)| *k == key) {
        Some((_, meta)) => (meta.label.to_string(), meta.description),
        None => (key.to_string(), GENERIC_DESCRIPTION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(features: Value) -> FeatureTable {
        normalize(&Summary::from_value(json!({ "features": features })).unwrap())
    }

    fn names(t: &FeatureTable) -> Vec<&str> {
        t.rows.iter().map(|r| r.row.feature.as_str()).collect()
    }

    #[test]
    fn reads_all_three_shapes() {
        let rows = json!([{"feature": "a", "gain": 2.0}, {"name": "b", "gain": 1.0}]);
        for payload in [
            rows.clone(),
            json!({ "items": rows.clone() }),
            json!({ "main_top20": rows.clone() }),
        ] {
            let t = table(payload);
            assert_eq!(names(&t), vec!["a", "b"]);
            assert_eq!(t.metric, ImportanceMetric::Gain);
        }
    }

    #[test]
    fn empty_items_falls_through_to_main_top20() {
        let t = table(json!({"items": [], "main_top20": [{"feature": "z", "gain": 1}]}));
        assert_eq!(names(&t), vec!["z"]);
    }

    #[test]
    fn unknown_shape_is_empty() {
        assert!(table(json!({"rows": [{"feature": "a"}]})).is_empty());
        assert!(table(json!("gain")).is_empty());
        assert!(normalize(&Summary::new()).is_empty());
    }

    #[test]
    fn selects_perm_rmse_when_gain_is_zero() {
        let t = table(json!({"main_top20": [
            {"feature": "a", "gain": 0, "perm_rmse": 1.0},
            {"feature": "b", "gain": 0, "perm_rmse": 3.0}
        ]}));
        assert_eq!(t.metric, ImportanceMetric::PermRmse);
        assert_eq!(names(&t), vec!["b", "a"]);
        assert!((t.rows[0].share_pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn gain_stays_selected_when_both_are_empty() {
        let t = table(json!([{"feature": "a"}, {"feature": "b"}]));
        assert_eq!(t.metric, ImportanceMetric::Gain);
        assert!(t.rows.iter().all(|r| r.share_pct == 0.0));
    }

    #[test]
    fn shares_use_the_full_set_before_truncation() {
        let rows: Vec<Value> = (0..15)
            .map(|i| json!({"feature": format!("f{i}"), "gain": (i + 1) as f64}))
            .collect();
        let t = table(Value::Array(rows));
        let total: f64 = (1..=15).map(|i| i as f64).sum();
        let sum_all: f64 = t.rows.iter().map(|r| r.share_pct).sum();
        assert!((sum_all - 100.0).abs() < 1e-9);

        let top = t.top(10);
        assert_eq!(top.len(), 10);
        assert_eq!(top[0].row.feature, "f14");
        assert!((top[0].share_pct - 15.0 / total * 100.0).abs() < 1e-9);
        assert_eq!(t.top(100).len(), 15);
    }

    #[test]
    fn ties_keep_payload_order() {
        let t = table(json!([
            {"feature": "x", "gain": 1},
            {"feature": "y", "gain": 2},
            {"feature": "z", "gain": 1}
        ]));
        assert_eq!(names(&t), vec!["y", "x", "z"]);
    }

    #[test]
    fn drops_rows_with_no_usable_metric_and_duplicates() {
        let t = table(json!([
            {"feature": "bad", "gain": "n/a", "perm_rmse": "n/a"},
            {"feature": "half", "gain": "n/a", "perm_rmse": 2},
            {"feature": "ok", "gain": "4"},
            {"feature": "ok", "gain": 100},
            {"gain": 5},
            "junk"
        ]));
        assert_eq!(names(&t), vec!["ok", "half"]);
        assert_eq!(t.rows[0].row.gain, 4.0);
        assert!(t.rows[1].row.gain.is_nan());
        assert_eq!(t.rows[1].share_pct, 0.0);
    }

    #[test]
    fn mixed_sign_shares_still_sum_to_100() {
        let t = table(json!([{"feature": "a", "gain": 1}, {"feature": "b", "gain": -2}]));
        let sum: f64 = t.rows.iter().map(|r| r.share_pct).sum();
        assert!((sum - 100.0).abs() < 1e-9);
        assert_eq!(t.rows[0].row.feature, "a");
        assert!((t.rows[0].share_pct + 100.0).abs() < 1e-9);
    }

    #[test]
    fn ranks_carry_catalog_text() {
        let t = table(json!([{"feature": "ret_5d", "gain": 1}, {"feature": "odd", "gain": 1}]));
        assert_eq!(t.rows[0].label, "5-day return");
        assert_eq!(t.rows[1].label, "odd");
        assert_eq!(t.rows[1].description, GENERIC_DESCRIPTION);
    }

    #[test]
    fn catalog_falls_back_to_key() {
        assert_eq!(feature_meta("ret_5d").0, "5-day return");
        let (label, desc) = feature_meta("mystery");
        assert_eq!(label, "mystery");
        assert_eq!(desc, GENERIC_DESCRIPTION);
    }
}
