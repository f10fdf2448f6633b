//! Cloud Provider
//!
//! The contract the autoscaler core consumes, and its EC2 implementation:
//! template resolution, instance-type matching, instance translation and drift
//! detection composed over the collaborator ports.

pub mod adapter;
pub mod drift;
pub mod provider_id;
pub mod template;
pub mod translate;

pub use adapter::*;
pub use provider_id::{format_provider_id, parse_instance_id};
pub use translate::instance_to_machine;

use crate::crd::{Machine, Provisioner};
use crate::domain::InstanceType;
use crate::error::Result;
use async_trait::async_trait;
use hyper::{Body, Request};
use tokio_util::sync::CancellationToken;

/// Provider-agnostic contract between the autoscaler and a cloud
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Launch an instance satisfying the machine's constraints
    async fn create(&self, cancel: &CancellationToken, machine: &Machine) -> Result<Machine>;

    /// Machine for the instance behind a provider identity
    async fn get(&self, cancel: &CancellationToken, provider_id: &str) -> Result<Machine>;

    /// Machines for every managed instance
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Machine>>;

    /// Terminate the machine's instance
    async fn delete(&self, cancel: &CancellationToken, machine: &Machine) -> Result<()>;

    /// Claim an instance created out-of-band for the machine
    async fn link(&self, cancel: &CancellationToken, machine: &Machine) -> Result<()>;

    /// All instance types a provisioner could launch
    async fn get_instance_types(
        &self,
        cancel: &CancellationToken,
        provisioner: &Provisioner,
    ) -> Result<Vec<InstanceType>>;

    /// Whether the machine's instance no longer matches its template
    async fn is_machine_drifted(&self, cancel: &CancellationToken, machine: &Machine) -> Result<bool>;

    /// Constant provider identifier
    fn name(&self) -> &'static str;

    /// Health of the provider's dependencies
    fn liveness_probe(&self, request: &Request<Body>) -> Result<()>;
}
