use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use crate::ranking_tree::NULL_KEY;

/// Name of the pseudo-dimension that stands for time bucketing.
///
/// It is never sent as a server side group by entry. When it appears in a stage, the
/// stage asks for the requested `Granularity` instead and rows take its value from
/// the record timestamp.
pub const GRANULARITY_DIMENSION: &str = "granularity";

/// Filters sent with a query: dimension name to allowed values.
pub type Filters = BTreeMap<String, Vec<String>>;

/// Time bucket size reported by the service.
#[derive(
    Default,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// No time bucketing, one bucket for the whole range.
    #[default]
    All,
    Minute,
    FifteenMinute,
    ThirtyMinute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// Inclusive time range of a query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimestampRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// Display label and raw value of one dimension in a row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionEntry {
    pub label: String,

    /// `None` when the service reported no value for the dimension.
    pub value: Option<String>,
}

impl DimensionEntry {
    pub fn new(label: impl Into<String>, value: Option<String>) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// One row returned for a drill-down stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRow {
    pub dimensions: BTreeMap<String, DimensionEntry>,

    pub metrics: BTreeMap<String, f64>,

    /// The dimension whose value gave this row its key in the ranking tree.
    ///
    /// Set by the orchestrator when the row is inserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_dimension: Option<String>,
}

impl StageRow {
    pub fn new(
        dimensions: BTreeMap<String, DimensionEntry>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            dimensions,
            metrics,
            group_dimension: None,
        }
    }

    /// Raw value of `dimension`, if the row has one.
    pub fn value_of(&self, dimension: &str) -> Option<&str> {
        self.dimensions
            .get(dimension)
            .and_then(|entry| entry.value.as_deref())
    }

    /// Key of this row at the tree level grouped by `dimension`.
    pub fn level_key(&self, dimension: &str) -> &str {
        self.value_of(dimension).unwrap_or(NULL_KEY)
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// How a grouped report is broken down and ranked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Dimensions to drill into, outermost first.
    pub groups: Vec<String>,

    /// Children kept per level, `None` keeps all.
    #[serde(default)]
    pub prune_sizes: Vec<Option<usize>>,

    /// Metric used to rank rows within a level.
    pub sort_id: String,

    #[serde(default)]
    pub sort_ascending: bool,
}

impl GroupSpec {
    pub fn new(groups: Vec<String>, sort_id: impl Into<String>) -> Self {
        Self {
            groups,
            prune_sizes: Vec::new(),
            sort_id: sort_id.into(),
            sort_ascending: false,
        }
    }

    /// Breakdown reports use fixed sizes whatever the number of groups.
    pub fn for_breakdown(mut self, sizes: &[usize]) -> Self {
        self.prune_sizes = sizes.iter().map(|size| Some(*size)).collect();
        self
    }

    /// Timeseries reports drill into time buckets last and never prune them.
    ///
    /// The pseudo-dimension is moved to the end of `groups`, appended when missing.
    /// Every other level keeps `size` children.
    pub fn for_timeseries(mut self, size: usize) -> Self {
        self.groups.retain(|group| group != GRANULARITY_DIMENSION);
        self.groups.push(GRANULARITY_DIMENSION.to_string());

        self.prune_sizes = self
            .groups
            .iter()
            .map(|group| {
                if group == GRANULARITY_DIMENSION {
                    None
                } else {
                    Some(size)
                }
            })
            .collect();

        self
    }
}

/// Parameters shared by every report type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportProperties {
    pub timestamp: TimestampRange,

    #[serde(default)]
    pub granularity: Granularity,

    #[serde(default)]
    pub filters: Filters,

    #[serde(default)]
    pub group: Option<GroupSpec>,
}

impl ReportProperties {
    pub fn new(timestamp: TimestampRange) -> Self {
        Self {
            timestamp,
            granularity: Granularity::All,
            filters: Filters::new(),
            group: None,
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_filter(mut self, dimension: impl Into<String>, values: Vec<String>) -> Self {
        self.filters.insert(dimension.into(), values);
        self
    }

    pub fn with_group(mut self, group: GroupSpec) -> Self {
        self.group = Some(group);
        self
    }
}

/// Query handed to the transport for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportQuery {
    pub granularity: Granularity,

    pub timestamp: TimestampRange,

    pub filters: Filters,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<String>,
}
