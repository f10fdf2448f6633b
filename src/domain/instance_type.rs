//! Instance Types
//!
//! A class of instance with fixed capacity, a requirement set describing its
//! label dimensions, and zone x capacity-type offerings.

use super::resources::{self, ResourceList};
use crate::error::Result;
use crate::labels;
use crate::scheduling::Requirements;
use serde::{Deserialize, Serialize};

// =============================================================================
// Offerings
// =============================================================================

/// Availability of an instance type in one zone for one capacity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offering {
    pub zone: String,
    pub capacity_type: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_true")]
    pub available: bool,
}

/// Ordered offerings of an instance type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offerings(pub Vec<Offering>);

impl Offerings {
    /// Offerings whose zone and capacity type are admitted by `requirements`
    pub fn requirements(&self, requirements: &Requirements) -> Offerings {
        Offerings(
            self.0
                .iter()
                .filter(|o| {
                    requirements.admits(labels::LABEL_TOPOLOGY_ZONE, &o.zone)
                        && requirements.admits(labels::LABEL_CAPACITY_TYPE, &o.capacity_type)
                })
                .cloned()
                .collect(),
        )
    }

    /// Offerings currently available
    pub fn available(&self) -> Offerings {
        Offerings(self.0.iter().filter(|o| o.available).cloned().collect())
    }

    /// Cheapest offering, if any
    pub fn cheapest(&self) -> Option<&Offering> {
        self.0
            .iter()
            .min_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Offering> {
        self.0.iter()
    }
}

// =============================================================================
// Overhead
// =============================================================================

/// Resources reserved on a node and unavailable to pods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceTypeOverhead {
    pub kube_reserved: ResourceList,
    pub system_reserved: ResourceList,
    pub eviction_threshold: ResourceList,
}

impl InstanceTypeOverhead {
    /// Total reserved resources
    pub fn total(&self) -> Result<ResourceList> {
        resources::merge(&[
            &self.kube_reserved,
            &self.system_reserved,
            &self.eviction_threshold,
        ])
    }
}

// =============================================================================
// Instance Type
// =============================================================================

/// An instance type as produced by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceType {
    pub name: String,
    pub requirements: Requirements,
    pub offerings: Offerings,
    pub capacity: ResourceList,
    pub overhead: InstanceTypeOverhead,
}

impl InstanceType {
    pub fn new(
        name: impl Into<String>,
        requirements: Requirements,
        offerings: Offerings,
        capacity: ResourceList,
        overhead: InstanceTypeOverhead,
    ) -> Self {
        Self {
            name: name.into(),
            requirements,
            offerings,
            capacity,
            overhead,
        }
    }

    /// Capacity minus reserved overhead. Unparseable quantities yield an
    /// empty list, which fits no non-zero request.
    pub fn allocatable(&self) -> ResourceList {
        self.overhead
            .total()
            .and_then(|overhead| resources::subtract(&self.capacity, &[&overhead]))
            .unwrap_or_default()
    }
}

fn default_true() -> bool {
    true
}
