use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{error, info};
use serde_json::Value;
use std::sync::Arc;

use drilldown_core::config::ClientConfig;
use drilldown_core::error::ReportingError;
use drilldown_core::ranking_tree::NestedNode;
use drilldown_core::response::{
    error_message, transform_dimension, transform_grouped, transform_totals, DimensionOption,
    Labeler, TotalsReport,
};
use drilldown_core::types::{GroupSpec, Granularity, ReportProperties, ReportQuery, StageRow};

use crate::orchestrator::{DrillDownOrchestrator, DrillDownRequest, QueryExecutor, StageQuery};
use crate::request_registry::RequestRegistry;
use crate::transport::{EndpointRequest, Transport};

pub const TOTALS_CALLER: &str = "totals";
pub const BREAKDOWN_CALLER: &str = "breakdown";
pub const TIMESERIES_CALLER: &str = "timeseries";
pub const DIMENSIONS_CALLER: &str = "dimensions";

/// Client of the reporting service.
///
/// `ReportingClient` implements the report types on top of a `Transport`. Every request
/// is tagged with a caller, and a new request for a caller aborts the one still in flight
/// for it, so only the latest totals, breakdown, timeseries or dimension lookup is ever
/// answered.
pub struct ReportingClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    labeler: Labeler,
    requests: RequestRegistry,
}

impl ReportingClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            labeler: Labeler::default(),
            requests: RequestRegistry::new(),
        }
    }

    /// Use `labeler` to label dimensions and metrics.
    pub fn with_labeler(mut self, labeler: Labeler) -> Self {
        self.labeler = labeler;
        self
    }

    pub fn set_credentials(&mut self, resource: &str, access_token: &str) {
        self.config.resource = resource.to_string();
        self.config.access_token = Some(access_token.to_string());
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn label_for(&self, key: &str, value: Option<&str>) -> String {
        self.labeler.label_for(key, value)
    }

    /// Send one request and return its JSON body.
    ///
    /// `resource` defaults to the configured resource. The request registered before for
    /// `caller` is aborted first. If this request is in turn superseded, it fails with
    /// `ReportingError::Cancelled`, even when its response had already arrived. Dropping
    /// the returned future aborts the request.
    pub async fn get_from_endpoint(
        &self,
        caller: &str,
        resource: Option<&str>,
        query: ReportQuery,
    ) -> Result<Value> {
        let resource = resource.unwrap_or(self.config.resource.as_str());
        if resource.is_empty() {
            bail!(ReportingError::InvalidRequest(
                "no resource configured".to_string()
            ));
        }

        self.requests.abort(caller);

        let request = EndpointRequest {
            url: self.config.endpoint_url(resource),
            caller: caller.to_string(),
            query,
            access_token: self.config.access_token.clone(),
        };

        let transport = Arc::clone(&self.transport);
        let task = tokio::spawn(async move { transport.get(request).await });

        let guard = self.requests.track(caller, task.abort_handle());
        let id = guard.id();
        let outcome = task.await;
        let current = guard.settle();

        let response = match outcome {
            // The task may finish before a newer request aborts it, its result is stale.
            Ok(_) if !current => {
                info!("dropping superseded response, caller: {}, id: {}", caller, id);
                bail!(ReportingError::Cancelled {
                    caller: caller.to_string()
                });
            }
            Ok(response) => response?,
            Err(e) if e.is_cancelled() => {
                info!("request cancelled, caller: {}, id: {}", caller, id);
                bail!(ReportingError::Cancelled {
                    caller: caller.to_string()
                });
            }
            Err(e) => {
                error!("request task failed, caller: {}, error: {}", caller, e);
                bail!(ReportingError::Transport(e.to_string()));
            }
        };

        if response.is_error() {
            let message = error_message(&response.body);
            error!(
                "request rejected, caller: {}, status: {}, message: {}",
                caller, response.status, message
            );

            bail!(ReportingError::Rejected {
                status: response.status,
                message,
            });
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }

        Ok(serde_json::from_str(&response.body)?)
    }

    /// Abort the in-flight request of `caller`.
    pub fn abort(&self, caller: &str) -> bool {
        self.requests.abort(caller)
    }

    /// Abort every in-flight request.
    pub fn tear_down(&self) {
        let aborted = self.requests.abort_all();
        info!("tear down, aborted requests: {}", aborted);
    }

    /// Number of requests still in flight.
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    pub async fn get_totals(&self, properties: &ReportProperties) -> Result<TotalsReport> {
        let query = ReportQuery {
            granularity: Granularity::All,
            timestamp: properties.timestamp.clone(),
            filters: properties.filters.clone(),
            group: vec![],
        };

        let body = self.get_from_endpoint(TOTALS_CALLER, None, query).await?;

        Ok(transform_totals(body, &self.labeler)?)
    }

    /// Drill down `properties.group` under the request tag `caller`.
    pub async fn get_grouped(
        &self,
        properties: &ReportProperties,
        caller: &str,
    ) -> Result<NestedNode<StageRow>> {
        let group = Self::group_of(properties)?;

        let request = DrillDownRequest {
            groups: group.groups.clone(),
            prune_sizes: group.prune_sizes.clone(),
            base_filters: properties.filters.clone(),
            sort_key: group.sort_id.clone(),
            sort_ascending: group.sort_ascending,
            granularity: properties.granularity,
            timestamp: properties.timestamp.clone(),
        };

        DrillDownOrchestrator::new(self, caller).run(&request).await
    }

    /// Grouped report with the configured breakdown prune sizes.
    pub async fn get_breakdown(
        &self,
        mut properties: ReportProperties,
    ) -> Result<NestedNode<StageRow>> {
        let group = Self::group_of(&properties)?.clone();
        properties.group = Some(group.for_breakdown(&self.config.breakdown_prune_sizes));

        self.get_grouped(&properties, BREAKDOWN_CALLER).await
    }

    /// Grouped report ending with time buckets, which are never pruned.
    pub async fn get_timeseries(
        &self,
        mut properties: ReportProperties,
    ) -> Result<NestedNode<StageRow>> {
        let group = Self::group_of(&properties)?.clone();
        properties.group = Some(group.for_timeseries(self.config.timeseries_prune_size));

        self.get_grouped(&properties, TIMESERIES_CALLER).await
    }

    /// Values of `dimension` matching `query`, within the other filters of `properties`.
    pub async fn get_dimension(
        &self,
        properties: &ReportProperties,
        dimension: &str,
        query: Vec<String>,
    ) -> Result<Vec<DimensionOption>> {
        let mut filters = properties.filters.clone();
        filters.insert(dimension.to_string(), query);

        let report_query = ReportQuery {
            granularity: properties.granularity,
            timestamp: properties.timestamp.clone(),
            filters,
            group: vec![],
        };

        let resource = format!("dimensions/{}", dimension);
        let body = self
            .get_from_endpoint(DIMENSIONS_CALLER, Some(&resource), report_query)
            .await?;

        Ok(transform_dimension(body, dimension, &self.labeler)?)
    }

    fn group_of(properties: &ReportProperties) -> Result<&GroupSpec> {
        match properties.group.as_ref() {
            Some(group) => Ok(group),
            None => bail!(ReportingError::InvalidRequest(
                "grouped report without group spec".to_string()
            )),
        }
    }
}

#[async_trait]
impl QueryExecutor for ReportingClient {
    async fn execute(&self, query: StageQuery, caller: &str) -> Result<Vec<StageRow>> {
        let StageQuery {
            granularity,
            timestamp,
            filters,
            group,
            labels,
        } = query;

        let report_query = ReportQuery {
            granularity,
            timestamp,
            filters,
            group,
        };

        let body = self.get_from_endpoint(caller, None, report_query).await?;

        Ok(transform_grouped(body, &labels, &self.labeler)?)
    }
}
