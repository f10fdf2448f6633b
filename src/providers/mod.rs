//! Collaborator implementations
//!
//! Concrete object stores, instance-type catalog, instance lifecycle provider
//! and AMI resolver the binary wires into the cloud provider.

pub mod ami;
pub mod catalog;
pub mod instances;
pub mod object_store;

pub use ami::{ImageEntry, StaticAmiProvider, AMI_SELECTOR_IDS_KEY};
pub use catalog::{CatalogEntry, CatalogFile, StaticCatalog};
pub use instances::InMemoryInstanceProvider;
pub use object_store::{InMemoryObjectStore, KubeObjectStore};
