//! Core of drill-down reporting: the ranking tree, stage planning and the adapters from
//! the reporting service's responses.
//!
//! Nothing here does I/O, the async side lives in `drilldown-client`.

pub mod config;
pub mod error;
pub mod ranking_tree;
pub mod response;
pub mod stage;
pub mod tool;
pub mod types;
