use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{error, info};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};

use drilldown_client::client::ReportingClient;
use drilldown_client::transport::FixtureTransport;
use drilldown_core::config::ClientConfig;
use drilldown_core::error::ReportingError;
use drilldown_core::error_bail;
use drilldown_core::tool::init_log;
use drilldown_core::types::{GroupSpec, Granularity, ReportProperties, TimestampRange};

const DEFAULT_RESOURCE: &str = "inventory";

#[derive(Clone, Copy, Debug, PartialEq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum ReportKind {
    Totals,
    Breakdown,
    Timeseries,
    Dimension,
}

/// Run a report against saved reporting service responses.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client config file, `toml` format.
    #[arg(short, long)]
    config: Option<String>,

    /// totals, breakdown, timeseries or dimension.
    #[arg(short, long, default_value = "breakdown")]
    kind: String,

    /// Dimension to group by, repeat for deeper breakdowns.
    #[arg(short, long = "group")]
    groups: Vec<String>,

    #[arg(long, default_value = "auctions")]
    sort_id: String,

    #[arg(long)]
    ascending: bool,

    #[arg(long, default_value = "all")]
    granularity: String,

    /// Start of the time range, RFC 3339.
    #[arg(long)]
    from: String,

    /// End of the time range, RFC 3339.
    #[arg(long)]
    to: String,

    /// Filter as `dimension=value1,value2`, repeatable.
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Dimension looked up by the `dimension` report.
    #[arg(long)]
    dimension: Option<String>,

    /// Values searched by the `dimension` report.
    #[arg(long)]
    query: Vec<String>,

    /// JSON response files, served in order.
    #[arg(long = "fixture", required = true)]
    fixtures: Vec<String>,
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn parse_filter(s: &str) -> Result<(String, Vec<String>)> {
    match s.split_once('=') {
        Some((dimension, values)) if !dimension.trim().is_empty() => Ok((
            dimension.trim().to_string(),
            values
                .split(',')
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
                .collect(),
        )),
        _ => {
            error_bail!("Invalid filter: {}, expected dimension=value1,value2", s);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match args.config.as_ref() {
        Some(path) => ClientConfig::from_config_file(path)?,
        None => ClientConfig::default(),
    };

    if config.resource.is_empty() {
        config.resource = DEFAULT_RESOURCE.to_string();
    }

    let kind = ReportKind::from_str(&args.kind).map_err(|_| {
        ReportingError::InvalidRequest(format!("unknown report kind: {}", args.kind))
    })?;
    let granularity = Granularity::from_str(&args.granularity).map_err(|_| {
        ReportingError::InvalidRequest(format!("unknown granularity: {}", args.granularity))
    })?;

    let mut properties = ReportProperties::new(TimestampRange::new(
        parse_time(&args.from)?,
        parse_time(&args.to)?,
    ))
    .with_granularity(granularity);

    for filter in args.filters.iter() {
        let (dimension, values) = parse_filter(filter)?;
        properties = properties.with_filter(dimension, values);
    }

    let mut group = GroupSpec::new(args.groups.clone(), args.sort_id.clone());
    group.sort_ascending = args.ascending;
    properties = properties.with_group(group);

    let transport = Arc::new(FixtureTransport::from_files(&args.fixtures)?);

    let client = ReportingClient::new(config, transport);

    info!("running report, kind: {}, groups: {:?}", kind, args.groups);

    let output = match kind {
        ReportKind::Totals => {
            serde_json::to_string_pretty(&client.get_totals(&properties).await?)?
        }
        ReportKind::Breakdown => {
            serde_json::to_string_pretty(&client.get_breakdown(properties).await?)?
        }
        ReportKind::Timeseries => {
            serde_json::to_string_pretty(&client.get_timeseries(properties).await?)?
        }
        ReportKind::Dimension => {
            let dimension = match args.dimension.as_ref() {
                Some(dimension) => dimension,
                None => bail!("--dimension is required for dimension reports"),
            };

            serde_json::to_string_pretty(
                &client
                    .get_dimension(&properties, dimension, args.query.clone())
                    .await?,
            )?
        }
    };

    println!("{}", output);

    Ok(())
}

fn main() -> Result<()> {
    init_log();

    let args = Args::parse();

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}
