//! Domain Ports - Collaborator trait definitions
//!
//! These traits define the boundaries between the adapter and the systems it
//! composes: the object store, the instance-type catalog, the instance
//! lifecycle provider and the AMI resolver. Every call takes the caller's
//! cancellation token.

use super::ami::{AmiFamily, AmiMetadata};
use super::instance::Instance;
use super::instance_type::InstanceType;
use crate::crd::{KubeletConfiguration, Machine, NodeTemplate, Provisioner};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Object Store Port
// =============================================================================

/// Read access to declarative objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a provisioner by name, NotFound if absent
    async fn get_provisioner(&self, cancel: &CancellationToken, name: &str) -> Result<Provisioner>;

    /// Fetch a node template by name, NotFound if absent
    async fn get_node_template(&self, cancel: &CancellationToken, name: &str) -> Result<NodeTemplate>;
}

// =============================================================================
// Instance Type Catalog Port
// =============================================================================

/// Source of instance types with their offerings and capacity
#[async_trait]
pub trait InstanceTypeCatalog: Send + Sync {
    /// Ordered instance types for a provisioner's kubelet settings and template
    async fn list(
        &self,
        cancel: &CancellationToken,
        kubelet: Option<&KubeletConfiguration>,
        template: &NodeTemplate,
    ) -> Result<Vec<InstanceType>>;

    /// Check the catalog is able to serve
    fn liveness_probe(&self) -> Result<()>;
}

// =============================================================================
// Instance Lifecycle Port
// =============================================================================

/// Create, observe and terminate cloud instances
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Launch one instance, trying the candidate types in a provider-defined
    /// order until one succeeds
    async fn create(
        &self,
        cancel: &CancellationToken,
        template: &NodeTemplate,
        machine: &Machine,
        instance_types: &[InstanceType],
    ) -> Result<Instance>;

    /// Fetch an instance by id, NotFound if absent or terminated
    async fn get(&self, cancel: &CancellationToken, id: &str) -> Result<Instance>;

    /// All instances managed for this cluster
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Instance>>;

    /// Terminate an instance, NotFound if already gone
    async fn delete(&self, cancel: &CancellationToken, id: &str) -> Result<()>;

    /// Tag an instance as owned by a Machine
    async fn link(&self, cancel: &CancellationToken, id: &str) -> Result<()>;
}

// =============================================================================
// AMI Resolver Port
// =============================================================================

/// Resolve the images a template implies for a set of instance types
#[async_trait]
pub trait AmiProvider: Send + Sync {
    /// AMI id -> metadata
    async fn get(
        &self,
        cancel: &CancellationToken,
        template: &NodeTemplate,
        instance_types: &[InstanceType],
        family: AmiFamily,
    ) -> Result<BTreeMap<String, AmiMetadata>>;
}

// =============================================================================
// Cancellation
// =============================================================================

/// Run a collaborator call, returning `Error::Cancelled` as soon as the token
/// fires. The call's future is dropped on cancellation, with no cleanup.
pub async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ObjectStoreRef = Arc<dyn ObjectStore>;
pub type InstanceTypeCatalogRef = Arc<dyn InstanceTypeCatalog>;
pub type InstanceProviderRef = Arc<dyn InstanceProvider>;
pub type AmiProviderRef = Arc<dyn AmiProvider>;
