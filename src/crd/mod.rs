//! Custom Resource Definitions consumed by the provider
//!
//! This module contains all CRD types:
//! - Machine: node request and its translated projection
//! - Provisioner: owning scheduling policy
//! - AWSNodeTemplate: provider launch configuration

pub mod machine;
pub mod node_template;
pub mod provisioner;

pub use machine::*;
pub use node_template::*;
pub use provisioner::*;
