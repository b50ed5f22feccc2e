//! Async client for drill-down reporting.
//!
//! `ReportingClient` sends the queries, `DrillDownOrchestrator` turns a grouped report into
//! a sequence of stage queries and merges their rows into a ranking tree.

pub mod client;
pub mod orchestrator;
pub mod request_registry;
pub mod transport;
