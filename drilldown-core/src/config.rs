use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Children kept per level by breakdown reports.
pub const DEFAULT_BREAKDOWN_PRUNE_SIZES: [usize; 3] = [50, 5, 5];

/// Children kept at every non time level by timeseries reports.
pub const DEFAULT_TIMESERIES_PRUNE_SIZE: usize = 50;

/// Client configuration, read from a `toml` file.
///
/// Examples:
///
/// host = "http://reporting.mock.com/v1"
/// resource = "inventory"
/// access_token = "123456789"
/// breakdown_prune_sizes = [50, 5, 5]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base url of the reporting service.
    pub host: String,

    /// Resource queried by grouped and totals reports.
    pub resource: String,

    pub access_token: Option<String>,

    pub breakdown_prune_sizes: Vec<usize>,

    pub timeseries_prune_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            resource: String::new(),
            access_token: None,
            breakdown_prune_sizes: DEFAULT_BREAKDOWN_PRUNE_SIZES.to_vec(),
            timeseries_prune_size: DEFAULT_TIMESERIES_PRUNE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(host: &str, resource: &str) -> Self {
        Self {
            host: host.to_string(),
            resource: resource.to_string(),
            ..Default::default()
        }
    }

    /// Parse from a `toml` file.
    pub fn from_config_file(filename: &str) -> Result<Self> {
        let content = std::fs::read_to_string(filename)?;
        Self::from_config_str(&content)
    }

    pub fn from_config_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Url of `resource` under `host`.
    pub fn endpoint_url(&self, resource: &str) -> String {
        format!("{}/{}", self.host.trim_end_matches('/'), resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_str() -> Result<()> {
        let config = ClientConfig::from_config_str(
            r#"
            host = "http://reporting.mock.com/v1"
            resource = "inventory"
            access_token = "123456789"
            breakdown_prune_sizes = [100, 10, 1]
            "#,
        )?;

        assert_eq!(config.host, "http://reporting.mock.com/v1");
        assert_eq!(config.access_token.as_deref(), Some("123456789"));
        assert_eq!(config.breakdown_prune_sizes, vec![100, 10, 1]);
        assert_eq!(config.timeseries_prune_size, DEFAULT_TIMESERIES_PRUNE_SIZE);

        Ok(())
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let config = ClientConfig::from_config_str("")?;
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.breakdown_prune_sizes, vec![50, 5, 5]);
        assert!(config.access_token.is_none());

        assert!(ClientConfig::from_config_str("timeseries_prune_size = \"many\"").is_err());

        Ok(())
    }

    #[test]
    fn test_endpoint_url() {
        let config = ClientConfig::new("http://reporting.mock.com/v1/", "inventory");
        assert_eq!(
            config.endpoint_url("inventory"),
            "http://reporting.mock.com/v1/inventory"
        );
        assert_eq!(
            config.endpoint_url("dimensions/app_id"),
            "http://reporting.mock.com/v1/dimensions/app_id"
        );
    }
}
