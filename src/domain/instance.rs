//! Cloud Instances
//!
//! The raw compute resource as reported by the cloud API. Observed, never
//! mutated, by the adapter.

use crate::labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Purchasing model marker reported for an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceLifecycle {
    Spot,
    #[default]
    Scheduled,
}

impl InstanceLifecycle {
    /// Capacity-type label value for this lifecycle
    pub fn capacity_type(&self) -> &'static str {
        match self {
            InstanceLifecycle::Spot => labels::CAPACITY_TYPE_SPOT,
            InstanceLifecycle::Scheduled => labels::CAPACITY_TYPE_ON_DEMAND,
        }
    }

    /// Lifecycle implied by a capacity-type label value
    pub fn from_capacity_type(capacity_type: &str) -> Self {
        if capacity_type == labels::CAPACITY_TYPE_SPOT {
            InstanceLifecycle::Spot
        } else {
            InstanceLifecycle::Scheduled
        }
    }
}

/// Instance state as reported by the cloud API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    #[default]
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    /// Whether the instance is gone or on its way out
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::ShuttingDown | InstanceState::Terminated)
    }
}

/// A cloud compute instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: String,
    pub image_id: String,
    pub availability_zone: String,
    pub instance_type: String,
    pub private_dns_name: String,
    /// Tag key -> value. Keys are unique.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub launch_time: DateTime<Utc>,
    /// Absent for on-demand instances
    #[serde(default)]
    pub instance_lifecycle: Option<InstanceLifecycle>,
    #[serde(default)]
    pub state: InstanceState,
}

impl Instance {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Name of the provisioner that owns this instance, if tagged
    pub fn provisioner_name(&self) -> Option<&str> {
        self.tag(labels::PROVISIONER_NAME_LABEL_KEY)
    }

    /// Capacity type derived from the spot marker
    pub fn capacity_type(&self) -> &'static str {
        self.instance_lifecycle.unwrap_or_default().capacity_type()
    }
}
