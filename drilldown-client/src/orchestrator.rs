use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};

use drilldown_core::ranking_tree::{NestedNode, RankingTree};
use drilldown_core::stage::{combine_filters, metric_comparator, plan_stages};
use drilldown_core::types::{Filters, Granularity, StageRow, TimestampRange};

/// Query for one drill-down stage.
#[derive(Clone, Debug, PartialEq)]
pub struct StageQuery {
    pub granularity: Granularity,

    pub timestamp: TimestampRange,

    pub filters: Filters,

    /// Group by list for the service, without the granularity pseudo-dimension.
    pub group: Vec<String>,

    /// Every dimension of the stage, used to label the returned rows.
    pub labels: Vec<String>,
}

/// Runs stage queries against the reporting service.
///
/// `caller` tags the request so that a newer request with the same tag can supersede it.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: StageQuery, caller: &str) -> Result<Vec<StageRow>>;
}

/// A grouped report to compute by progressive drill-down.
#[derive(Clone, Debug, PartialEq)]
pub struct DrillDownRequest {
    /// Dimensions to drill into, outermost first.
    pub groups: Vec<String>,

    /// Children kept per tree level, `None` or a missing entry keeps all.
    pub prune_sizes: Vec<Option<usize>>,

    pub base_filters: Filters,

    /// Metric used to rank rows within a level.
    pub sort_key: String,

    pub sort_ascending: bool,

    /// Granularity asked for by stages that group by time buckets.
    pub granularity: Granularity,

    pub timestamp: TimestampRange,
}

/// Drives one drill-down request end to end.
///
/// Stages run strictly one after another: the filters of a stage are built from the rows
/// that survived pruning in the previous one. The ranking tree belongs to a single call
/// of `run` and is dropped with it, so a run that fails or is cancelled leaves nothing
/// behind and has to be started again from the first stage.
pub struct DrillDownOrchestrator<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    caller: String,
}

impl<'a, E: QueryExecutor + ?Sized> DrillDownOrchestrator<'a, E> {
    pub fn new(executor: &'a E, caller: &str) -> Self {
        Self {
            executor,
            caller: caller.to_string(),
        }
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    /// Run every stage of `request` and return the pruned tree.
    ///
    /// The first failing stage query aborts the run and its error is returned unchanged.
    pub async fn run(&self, request: &DrillDownRequest) -> Result<NestedNode<StageRow>> {
        let stages = plan_stages(&request.groups, request.granularity);

        let mut tree: RankingTree<StageRow> = RankingTree::new();
        let mut compare = metric_comparator(&request.sort_key, request.sort_ascending);

        for (index, stage) in stages.iter().enumerate() {
            let filters =
                combine_filters(&request.base_filters, &tree.flatten(), stage.leading());

            debug!(
                "stage filters, caller: {}, stage: {}, filters: {:?}",
                self.caller, index, filters
            );

            let filter_dimensions = filters.keys().cloned().collect::<Vec<_>>();

            let query = StageQuery {
                granularity: stage.granularity,
                timestamp: request.timestamp.clone(),
                filters,
                group: stage.group.clone(),
                labels: stage.dimensions.clone(),
            };

            let rows = self.executor.execute(query, &self.caller).await?;

            info!(
                "stage done, caller: {}, stage: {}, group: {:?}, granularity: {}, filters: {:?}, rows: {}",
                self.caller,
                index,
                stage.group,
                stage.granularity,
                filter_dimensions,
                rows.len()
            );

            let leaf = stage.leaf();

            for mut row in rows {
                let key = row.level_key(leaf).to_string();
                let path = stage
                    .leading()
                    .iter()
                    .map(|dimension| row.level_key(dimension).to_string())
                    .collect::<Vec<_>>();

                row.group_dimension = Some(leaf.to_string());
                tree.insert(row, Some(key.as_str()), &path);
            }

            tree.prune_by_level(&mut compare, &request.prune_sizes);
        }

        Ok(tree.into_nested())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use chrono::{TimeZone, Utc};
    use drilldown_core::types::DimensionEntry;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Serves canned rows per stage and records every query.
    struct CannedExecutor {
        responses: Mutex<Vec<Result<Vec<StageRow>, String>>>,
        queries: Mutex<Vec<StageQuery>>,
    }

    impl CannedExecutor {
        fn new(mut responses: Vec<Result<Vec<StageRow>, String>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn queries(&self) -> Vec<StageQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for CannedExecutor {
        async fn execute(&self, query: StageQuery, _caller: &str) -> Result<Vec<StageRow>> {
            self.queries.lock().unwrap().push(query);

            let next = self.responses.lock().unwrap().pop();
            match next {
                Some(Ok(rows)) => Ok(rows),
                Some(Err(message)) => bail!(message),
                None => Ok(vec![]),
            }
        }
    }

    fn row(dimensions: &[(&str, &str)], auctions: f64) -> StageRow {
        let dimensions = dimensions
            .iter()
            .map(|&(name, value)| {
                (
                    name.to_string(),
                    DimensionEntry::new(value, Some(value.to_string())),
                )
            })
            .collect();

        let metrics = [("auctions".to_string(), auctions)].into_iter().collect();

        StageRow::new(dimensions, metrics)
    }

    fn request(
        groups: &[&str],
        prune_sizes: Vec<Option<usize>>,
        ascending: bool,
    ) -> DrillDownRequest {
        DrillDownRequest {
            groups: groups.iter().map(|s| s.to_string()).collect(),
            prune_sizes,
            base_filters: BTreeMap::new(),
            sort_key: "auctions".to_string(),
            sort_ascending: ascending,
            granularity: Granularity::Hour,
            timestamp: TimestampRange::new(
                Utc.with_ymd_and_hms(2016, 1, 7, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2016, 1, 8, 0, 0, 0).unwrap(),
            ),
        }
    }

    fn metric_of(node: &NestedNode<StageRow>) -> Option<f64> {
        node.data.as_ref().and_then(|row| row.metric("auctions"))
    }

    #[tokio::test]
    async fn test_single_stage_sorted_descending() -> Result<()> {
        let executor = CannedExecutor::new(vec![Ok(vec![
            row(&[("app_id", "a")], 2.0),
            row(&[("app_id", "b")], 100.0),
            row(&[("app_id", "c")], 10.0),
        ])]);

        let orchestrator = DrillDownOrchestrator::new(&executor, "breakdown");
        let nested = orchestrator
            .run(&request(&["app_id"], vec![Some(50)], false))
            .await?;

        assert!(nested.data.is_none());
        let values = nested.children.iter().map(metric_of).collect::<Vec<_>>();
        assert_eq!(values, vec![Some(100.0), Some(10.0), Some(2.0)]);

        let first = nested.children[0].data.as_ref().unwrap();
        assert_eq!(first.group_dimension.as_deref(), Some("app_id"));

        Ok(())
    }

    #[tokio::test]
    async fn test_single_stage_sorted_ascending() -> Result<()> {
        let executor = CannedExecutor::new(vec![Ok(vec![
            row(&[("app_id", "a")], 10.0),
            row(&[("app_id", "b")], 100.0),
            row(&[("app_id", "c")], 2.0),
        ])]);

        let orchestrator = DrillDownOrchestrator::new(&executor, "breakdown");
        let nested = orchestrator
            .run(&request(&["app_id"], vec![None], true))
            .await?;

        let values = nested.children.iter().map(metric_of).collect::<Vec<_>>();
        assert_eq!(values, vec![Some(2.0), Some(10.0), Some(100.0)]);

        Ok(())
    }

    #[tokio::test]
    async fn test_second_stage_filtered_by_survivors() -> Result<()> {
        let executor = CannedExecutor::new(vec![
            Ok(vec![
                row(&[("app_id", "a")], 1.0),
                row(&[("app_id", "b")], 3.0),
                row(&[("app_id", "c")], 2.0),
            ]),
            Ok(vec![
                row(&[("app_id", "b"), ("country", "US")], 5.0),
                row(&[("app_id", "b"), ("country", "DE")], 7.0),
                row(&[("app_id", "b"), ("country", "FR")], 6.0),
                row(&[("app_id", "c"), ("country", "US")], 1.0),
            ]),
        ]);

        let orchestrator = DrillDownOrchestrator::new(&executor, "breakdown");
        let nested = orchestrator
            .run(&request(&["app_id", "country"], vec![Some(2), Some(2)], false))
            .await?;

        let queries = executor.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].filters.is_empty());
        assert_eq!(queries[0].group, vec!["app_id".to_string()]);
        assert_eq!(
            queries[1].filters["app_id"],
            vec!["b".to_string(), "c".to_string()]
        );
        assert_eq!(
            queries[1].group,
            vec!["app_id".to_string(), "country".to_string()]
        );

        assert_eq!(nested.children.len(), 2);
        let b = &nested.children[0];
        assert_eq!(metric_of(b), Some(3.0));
        let countries = b
            .children
            .iter()
            .map(|child| child.data.as_ref().unwrap().level_key("country").to_string())
            .collect::<Vec<_>>();
        assert_eq!(countries, vec!["DE", "FR"]);

        let c = &nested.children[1];
        assert_eq!(c.children.len(), 1);
        assert_eq!(
            c.children[0].data.as_ref().unwrap().group_dimension.as_deref(),
            Some("country")
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_granularity_stage_query() -> Result<()> {
        let executor = CannedExecutor::new(vec![
            Ok(vec![row(&[("app_id", "a")], 1.0)]),
            Ok(vec![
                row(&[("app_id", "a"), ("granularity", "2016-01-07T00:00:00Z")], 1.0),
                row(&[("app_id", "a"), ("granularity", "2016-01-07T01:00:00Z")], 2.0),
            ]),
        ]);

        let orchestrator = DrillDownOrchestrator::new(&executor, "timeseries");
        let nested = orchestrator
            .run(&request(&["app_id", "granularity"], vec![Some(50), None], false))
            .await?;

        let queries = executor.queries();
        assert_eq!(queries[0].granularity, Granularity::All);
        assert_eq!(queries[1].granularity, Granularity::Hour);
        assert_eq!(queries[1].group, vec!["app_id".to_string()]);
        assert_eq!(
            queries[1].labels,
            vec!["app_id".to_string(), "granularity".to_string()]
        );
        assert!(queries[1].filters.get("granularity").is_none());

        assert_eq!(nested.children[0].children.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_stage_aborts_run() -> Result<()> {
        let executor = CannedExecutor::new(vec![
            Ok(vec![row(&[("app_id", "a")], 1.0)]),
            Err("service unavailable".to_string()),
        ]);

        let orchestrator = DrillDownOrchestrator::new(&executor, "breakdown");
        let result = orchestrator
            .run(&request(
                &["app_id", "country", "os"],
                vec![Some(5), Some(5), Some(5)],
                false,
            ))
            .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), "service unavailable");
        assert_eq!(executor.queries().len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_stage_proceeds_with_empty_filter() -> Result<()> {
        let executor = CannedExecutor::new(vec![Ok(vec![]), Ok(vec![])]);

        let orchestrator = DrillDownOrchestrator::new(&executor, "breakdown");
        let nested = orchestrator
            .run(&request(&["app_id", "country"], vec![Some(5), Some(5)], false))
            .await?;

        let queries = executor.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries[1].filters.get("app_id").is_none());
        assert!(queries[1].filters.is_empty());
        assert!(nested.children.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_no_groups_issues_no_query() -> Result<()> {
        let executor = CannedExecutor::new(vec![]);

        let orchestrator = DrillDownOrchestrator::new(&executor, "breakdown");
        let nested = orchestrator.run(&request(&[], vec![], false)).await?;

        assert!(executor.queries().is_empty());
        assert_eq!(nested, NestedNode { data: None, children: vec![] });

        Ok(())
    }
}
