//! Merge the summary returned by `POST /run` with the persisted summary file.
//!
//! The persisted file is fresher, so its top-level fields win. The feature
//! payload is the exception: it has had both sequence and keyed-object shapes
//! over time, and a plain field override would let an object silently replace
//! an ordered row list.

use crate::model::Summary;
use serde_json::{Map, Value};

/// Summary field holding the feature-importance payload.
pub const FEATURES_KEY: &str = "features";

/// Build the canonical summary for a run.
///
/// `polled` is `None` when the summary file could not be fetched or parsed; the
/// response summary is then used unmodified.
pub fn reconcile(response: Option<&Summary>, polled: Option<&Summary>) -> Summary {
    let mut merged: Map<String, Value> = response.map(|s| s.as_map().clone()).unwrap_or_default();

    let Some(polled) = polled else {
        return Summary::from(merged);
    };

    for (key, value) in polled.as_map() {
        if key == FEATURES_KEY {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    let baseline_features = merged.remove(FEATURES_KEY);
    if let Some(features) = merge_features(baseline_features, polled.get(FEATURES_KEY)) {
        merged.insert(FEATURES_KEY.to_string(), features);
    }

    Summary::from(merged)
}

fn merge_features(baseline: Option<Value>, polled: Option<&Value>) -> Option<Value> {
    match (baseline, polled) {
        (_, Some(Value::Array(rows))) => Some(Value::Array(rows.clone())),
        (Some(Value::Array(rows)), _) => Some(Value::Array(rows)),
        (Some(Value::Object(mut base)), Some(Value::Object(fresh))) => {
            for (k, v) in fresh {
                base.insert(k.clone(), v.clone());
            }
            Some(Value::Object(base))
        }
        (_, Some(Value::Object(fresh))) => Some(Value::Object(fresh.clone())),
        (baseline, _) => baseline,
    }
}
