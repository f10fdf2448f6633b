//! Instance Type Matching
//!
//! Filters an instance-type catalog down to the entries that can host a
//! Machine. Eligibility only: catalog order is preserved and nothing is ranked.

use super::requirements::Requirements;
use crate::domain::resources::{self, ResourceList};
use crate::domain::InstanceType;

/// Why an instance type was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incompatibility {
    /// Requirements don't intersect
    Requirements(String),
    /// No available offering survives the machine's zone/capacity-type requirements
    NoAvailableOffering,
    /// A requested resource exceeds allocatable
    ResourcesDontFit,
}

impl std::fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Incompatibility::Requirements(reason) => write!(f, "incompatible requirements, {}", reason),
            Incompatibility::NoAvailableOffering => write!(f, "no available offering"),
            Incompatibility::ResourcesDontFit => write!(f, "requests exceed allocatable"),
        }
    }
}

/// Check a single instance type against a machine's requirements and requests
pub fn check(
    requirements: &Requirements,
    requests: &ResourceList,
    instance_type: &InstanceType,
) -> Result<(), Incompatibility> {
    requirements
        .compatible(&instance_type.requirements)
        .map_err(Incompatibility::Requirements)?;
    if instance_type
        .offerings
        .requirements(requirements)
        .available()
        .is_empty()
    {
        return Err(Incompatibility::NoAvailableOffering);
    }
    if !resources::fits(requests, &instance_type.allocatable()) {
        return Err(Incompatibility::ResourcesDontFit);
    }
    Ok(())
}

/// Instance types able to host the machine, in catalog order
pub fn compatible_instance_types(
    requirements: &Requirements,
    requests: &ResourceList,
    instance_types: Vec<InstanceType>,
) -> Vec<InstanceType> {
    instance_types
        .into_iter()
        .filter(|instance_type| check(requirements, requests, instance_type).is_ok())
        .collect()
}
