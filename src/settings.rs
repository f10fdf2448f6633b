//! Provider Settings
//!
//! Configuration assembled once at start-up and shared read-only with every
//! component that needs it.

use crate::error::{Error, Result};
use crate::labels;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Maximum number of instance types forwarded per launch request
pub const MAX_INSTANCE_TYPES: usize = 60;

/// How translated Machines are named
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeNameConvention {
    /// Use the cloud instance id
    ResourceName,
    /// Use the lower-cased private DNS name
    #[default]
    IpName,
}

impl std::fmt::Display for NodeNameConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeNameConvention::ResourceName => write!(f, "resource-name"),
            NodeNameConvention::IpName => write!(f, "ip-name"),
        }
    }
}

impl std::str::FromStr for NodeNameConvention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "resource-name" => Ok(NodeNameConvention::ResourceName),
            "ip-name" => Ok(NodeNameConvention::IpName),
            other => Err(Error::Configuration(format!(
                "unknown node name convention: {}",
                other
            ))),
        }
    }
}

/// Provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Cluster the provider launches instances for
    pub cluster_name: String,
    /// Naming convention for translated Machines
    pub node_name_convention: NodeNameConvention,
    /// Scheme prefix of provider identity strings
    pub provider_id_scheme: String,
    /// Cap on candidate instance types per launch
    pub max_instance_types: usize,
    /// Label aliases, alias -> canonical key
    pub normalized_labels: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            node_name_convention: NodeNameConvention::default(),
            provider_id_scheme: "aws".to_string(),
            max_instance_types: MAX_INSTANCE_TYPES,
            normalized_labels: labels::default_normalized_labels(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Reject settings the provider can't operate with
    pub fn validate(&self) -> Result<()> {
        if self.provider_id_scheme.is_empty() || self.provider_id_scheme.contains(':') {
            return Err(Error::Configuration(format!(
                "invalid provider id scheme: {:?}",
                self.provider_id_scheme
            )));
        }
        if self.max_instance_types == 0 {
            return Err(Error::Configuration(
                "maxInstanceTypes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
