use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{error, info};
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::Mutex;

use drilldown_core::error_bail;
use drilldown_core::types::ReportQuery;

/// A single GET request to the reporting service.
///
/// Encoding `query` into the url is left to the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointRequest {
    /// Endpoint url without query string.
    pub url: String,

    /// Tag of the logical request, sent as the `X-View-Caller` header.
    pub caller: String,

    pub query: ReportQuery,

    pub access_token: Option<String>,
}

/// Raw response of the reporting service.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// Sends requests to the reporting service.
///
/// Implementations run inside a spawned task so that a superseded request can be aborted.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, request: EndpointRequest) -> Result<RawResponse>;
}

/// Serves queued responses in order and records the requests it receives.
///
/// Used by tests and by the command line tool to replay saved responses.
#[derive(Default)]
pub struct FixtureTransport {
    responses: Mutex<VecDeque<RawResponse>>,
    requests: Mutex<Vec<EndpointRequest>>,
}

impl FixtureTransport {
    pub fn new(responses: Vec<RawResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue JSON bodies. A body with an `errors` key is served with status 400.
    pub fn from_bodies<S: AsRef<str>>(bodies: &[S]) -> Self {
        Self::new(
            bodies
                .iter()
                .map(|body| Self::response_for_body(body.as_ref()))
                .collect(),
        )
    }

    /// Queue the content of JSON files, in order.
    pub fn from_files(filenames: &[String]) -> Result<Self> {
        let mut bodies = Vec::with_capacity(filenames.len());

        for filename in filenames {
            if !Path::new(filename).exists() {
                error_bail!("Fixture file not found: {}", filename);
            }

            bodies.push(std::fs::read_to_string(filename)?);
        }

        info!("loaded {} fixture responses", bodies.len());

        Ok(Self::from_bodies(&bodies))
    }

    fn response_for_body(body: &str) -> RawResponse {
        let is_error = serde_json::from_str::<serde_json::Value>(body)
            .map(|value| value.get("errors").is_some())
            .unwrap_or(false);

        RawResponse::new(if is_error { 400 } else { 200 }, body)
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<EndpointRequest> {
        self.requests.lock().await.clone()
    }

    /// Responses not served yet.
    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get(&self, request: EndpointRequest) -> Result<RawResponse> {
        let caller = request.caller.clone();
        self.requests.lock().await.push(request);

        match self.responses.lock().await.pop_front() {
            Some(response) => Ok(response),
            None => {
                error_bail!("No fixture response left for caller: {}", caller);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use drilldown_core::types::{Filters, Granularity, TimestampRange};

    fn request(caller: &str) -> EndpointRequest {
        EndpointRequest {
            url: "http://reporting.mock.com/v1/inventory".to_string(),
            caller: caller.to_string(),
            query: ReportQuery {
                granularity: Granularity::All,
                timestamp: TimestampRange::new(
                    Utc.with_ymd_and_hms(2016, 1, 7, 0, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2016, 1, 8, 0, 0, 0).unwrap(),
                ),
                filters: Filters::new(),
                group: vec![],
            },
            access_token: None,
        }
    }

    #[tokio::test]
    async fn test_fixture_transport_serves_in_order() -> Result<()> {
        let transport = FixtureTransport::from_bodies(&[
            r#"{"data": []}"#,
            r#"{"errors": [{"message": "Missing Authorization header from request"}]}"#,
        ]);

        let first = transport.get(request("totals")).await?;
        assert_eq!(first.status, 200);
        assert!(!first.is_error());

        let second = transport.get(request("breakdown")).await?;
        assert_eq!(second.status, 400);
        assert!(second.is_error());

        assert!(transport.get(request("breakdown")).await.is_err());

        let callers = transport
            .requests()
            .await
            .into_iter()
            .map(|r| r.caller)
            .collect::<Vec<_>>();
        assert_eq!(callers, vec!["totals", "breakdown", "breakdown"]);
        assert_eq!(transport.remaining().await, 0);

        Ok(())
    }

    #[test]
    fn test_from_files_missing_file() {
        let result = FixtureTransport::from_files(&["resources/does_not_exist.json".to_string()]);
        assert!(result.is_err());
    }
}
