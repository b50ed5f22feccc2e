//! Stage planning for progressive drill-down.
//!
//! A request grouped by `[a, b, c]` runs three stages grouped by `[a]`, `[a, b]` and
//! `[a, b, c]`. Every stage after the first is filtered by the values that survived
//! pruning in the stage before it, so each query only asks for the branches that are
//! still in the ranking tree.

use std::cmp::Ordering;

use crate::tool::dedup_keep_order;
use crate::types::{Filters, Granularity, StageRow, GRANULARITY_DIMENSION};

/// One cumulative group by depth.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    /// Full prefix of the requested groups, used to label rows and build tree paths.
    pub dimensions: Vec<String>,

    /// Group by list sent to the service, without the pseudo-dimension.
    pub group: Vec<String>,

    pub granularity: Granularity,
}

impl Stage {
    /// The dimension grouped at this stage's tree level.
    pub fn leaf(&self) -> &str {
        self.dimensions
            .last()
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// Dimensions of the ancestor levels, outermost first.
    pub fn leading(&self) -> &[String] {
        match self.dimensions.split_last() {
            Some((_, leading)) => leading,
            None => &[],
        }
    }
}

/// Build the ordered stages for `groups`.
///
/// A stage whose prefix holds the pseudo-dimension asks for `granularity`, every other
/// stage asks for `Granularity::All`.
pub fn plan_stages(groups: &[String], granularity: Granularity) -> Vec<Stage> {
    (1..=groups.len())
        .map(|depth| {
            let dimensions = groups[..depth].to_vec();

            let has_granularity = dimensions.iter().any(|d| d == GRANULARITY_DIMENSION);

            let group = dimensions
                .iter()
                .filter(|d| *d != GRANULARITY_DIMENSION)
                .cloned()
                .collect();

            Stage {
                dimensions,
                group,
                granularity: if has_granularity {
                    granularity
                } else {
                    Granularity::All
                },
            }
        })
        .collect()
}

/// Base filters plus the values of `target_dimensions` seen in `survivors`.
///
/// Values are kept in survivor order with duplicates removed. Rows without a value for a
/// dimension add nothing, a dimension no survivor has a value for is left out, and the
/// pseudo-dimension never becomes a filter.
pub fn combine_filters(
    base: &Filters,
    survivors: &[&StageRow],
    target_dimensions: &[String],
) -> Filters {
    let mut filters = base.clone();

    for dimension in target_dimensions
        .iter()
        .filter(|d| *d != GRANULARITY_DIMENSION)
    {
        let values = survivors
            .iter()
            .filter_map(|row| row.value_of(dimension))
            .map(|value| value.to_string())
            .collect::<Vec<_>>();

        // No value seen means no constraint on the dimension.
        if values.is_empty() {
            continue;
        }

        filters.entry(dimension.clone()).or_default().extend(values);
    }

    for values in filters.values_mut() {
        dedup_keep_order(values);
    }

    filters
}

/// Rank rows by the metric `sort_id`.
///
/// Rows without the metric go after rows that have it, in both directions, which keeps
/// the order total.
pub fn metric_comparator(
    sort_id: &str,
    ascending: bool,
) -> impl FnMut(&StageRow, &StageRow) -> Ordering + Send + '_ {
    move |a, b| match (a.metric(sort_id), b.metric(sort_id)) {
        (Some(x), Some(y)) => {
            if ascending {
                x.total_cmp(&y)
            } else {
                y.total_cmp(&x)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
