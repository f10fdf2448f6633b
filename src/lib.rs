//! EC2 Machine Provider
//!
//! Reconciliation adapter between a cluster autoscaler's Machine model and
//! the EC2 instance lifecycle. Resolves which instance types can satisfy a
//! Machine, drives instance creation, lookup and termination, translates
//! instances back into Machines, and detects AMI drift.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        CloudProvider (AwsCloudProvider)                      │
//! │   create · get · list · delete · link · get_instance_types · is_drifted      │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐  ┌─────────┐ │
//! │  │  Node Template  │  │   Constraint    │  │      State      │  │  Drift  │ │
//! │  │    Resolver     │  │     Matcher     │  │   Translator    │  │ Detector│ │
//! │  └────────┬────────┘  └────────┬────────┘  └────────┬────────┘  └────┬────┘ │
//! ├───────────┴────────────────────┴────────────────────┴────────────────┴──────┤
//! │                           Collaborator Ports                                 │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌───────────────────┐  ┌─────────┐ │
//! │  │ Object Store │  │ Instance Catalog │  │ Instance Provider │  │   AMI   │ │
//! │  └──────────────┘  └──────────────────┘  └───────────────────┘  └─────────┘ │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cloudprovider`]: The provider contract and its EC2 implementation
//! - [`scheduling`]: Requirement algebra and instance-type matching
//! - [`domain`]: Instances, instance types, resources and collaborator ports
//! - [`providers`]: Concrete collaborator implementations
//! - [`crd`]: Custom Resource Definitions
//! - [`error`]: Error types and handling

pub mod cloudprovider;
pub mod crd;
pub mod domain;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod providers;
pub mod scheduling;
pub mod settings;

// Re-export commonly used types
pub use cloudprovider::{
    format_provider_id, instance_to_machine, parse_instance_id,
    AwsCloudProvider, CloudProvider, Collaborators, PROVIDER_NAME,
};

pub use crd::{
    Machine, MachineSpec, MachineStatus,
    NodeTemplate, NodeTemplateSpec, AwsProvider,
    Provisioner, ProvisionerSpec, KubeletConfiguration,
};

pub use domain::{
    AmiFamily, AmiMetadata, Instance, InstanceType, Offering, Offerings, ResourceList,
};

pub use domain::ports::{
    AmiProvider, InstanceProvider, InstanceTypeCatalog, ObjectStore,
};

pub use error::{Error, Result, ErrorAction};

pub use metrics::ProviderMetrics;

pub use providers::{
    InMemoryInstanceProvider, InMemoryObjectStore, KubeObjectStore,
    StaticAmiProvider, StaticCatalog,
};

pub use scheduling::{compatible_instance_types, Requirement, Requirements};

pub use settings::{NodeNameConvention, Settings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
