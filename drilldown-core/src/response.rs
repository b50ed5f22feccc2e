//! Adapters from the reporting service's JSON bodies to the types used by the client.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::types::{DimensionEntry, StageRow, GRANULARITY_DIMENSION};

/// Hook turning a dimension (or metric) name and raw value into a display label.
pub type LabelFn = dyn Fn(&str, Option<&str>) -> String + Send + Sync;

/// Produces labels for dimensions and metrics.
///
/// Without a hook, the label is the value itself, or the key when there is no value.
#[derive(Clone, Default)]
pub struct Labeler {
    hook: Option<Arc<LabelFn>>,
}

impl Labeler {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> String + Send + Sync + 'static,
    {
        Self {
            hook: Some(Arc::new(hook)),
        }
    }

    pub fn label_for(&self, key: &str, value: Option<&str>) -> String {
        match (&self.hook, value) {
            (Some(hook), _) => hook(key, value),
            (None, Some(value)) if !value.is_empty() => value.to_string(),
            (None, _) => key.to_string(),
        }
    }
}

impl fmt::Debug for Labeler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Labeler")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// One record of a grouped or totals response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultRecord {
    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub dimensions: BTreeMap<String, Value>,

    #[serde(default)]
    pub result: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupedResponse {
    #[serde(default)]
    pub data: Vec<ResultRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DimensionResponse {
    #[serde(default)]
    pub data: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorMessage>,
}

/// A metric value with its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledMetric {
    pub value: f64,
    pub label: String,
}

/// Result of a totals report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalsReport {
    pub metrics: BTreeMap<String, LabeledMetric>,
}

/// One selectable value of a dimension lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionOption {
    pub id: String,
    pub data: String,
    pub label: String,
}

/// Render a raw JSON dimension value, `null` becomes `None`.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn numeric_metrics(result: &BTreeMap<String, Value>) -> BTreeMap<String, f64> {
    result
        .iter()
        .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
        .collect()
}

/// Build stage rows from a grouped response.
///
/// Each row gets an entry for every dimension in `labels`. The pseudo-dimension takes the
/// record timestamp as value and is labelled by that value.
pub fn transform_grouped(
    body: Value,
    labels: &[String],
    labeler: &Labeler,
) -> serde_json::Result<Vec<StageRow>> {
    let response: GroupedResponse = serde_json::from_value(body)?;

    let rows = response
        .data
        .into_iter()
        .map(|record| {
            let dimensions = labels
                .iter()
                .map(|key| {
                    let entry = if key == GRANULARITY_DIMENSION {
                        let value = record.timestamp.clone();
                        let label = value.clone().unwrap_or_else(|| key.clone());
                        DimensionEntry::new(label, value)
                    } else {
                        let value = record.dimensions.get(key).and_then(value_to_string);
                        DimensionEntry::new(labeler.label_for(key, value.as_deref()), value)
                    };

                    (key.clone(), entry)
                })
                .collect();

            StageRow::new(dimensions, numeric_metrics(&record.result))
        })
        .collect();

    Ok(rows)
}

/// Metrics of the last record of a totals response.
pub fn transform_totals(body: Value, labeler: &Labeler) -> serde_json::Result<TotalsReport> {
    let response: GroupedResponse = serde_json::from_value(body)?;

    let metrics = response
        .data
        .last()
        .map(|record| numeric_metrics(&record.result))
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let label = labeler.label_for(&name, None);
            (name, LabeledMetric { value, label })
        })
        .collect();

    Ok(TotalsReport { metrics })
}

/// Values of `dimension` from a dimension lookup response.
pub fn transform_dimension(
    body: Value,
    dimension: &str,
    labeler: &Labeler,
) -> serde_json::Result<Vec<DimensionOption>> {
    let response: DimensionResponse = serde_json::from_value(body)?;

    let options = response
        .data
        .get(dimension)
        .map(|values| {
            values
                .iter()
                .filter_map(value_to_string)
                .map(|value| DimensionOption {
                    id: value.clone(),
                    label: labeler.label_for(dimension, Some(&value)),
                    data: value,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(options)
}

/// Human readable message of an error body.
///
/// Uses the last entry of `errors`, falls back to the raw body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|response| response.errors.into_iter().last())
        .map(|error| error.message)
        .unwrap_or_else(|| body.to_string())
}
