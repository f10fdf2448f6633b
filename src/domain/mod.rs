//! Domain layer - Cloud-side model and collaborator ports
//!
//! Instances, instance types and resource arithmetic, plus the traits (ports)
//! the adapter composes.

pub mod ami;
pub mod instance;
pub mod instance_type;
pub mod ports;
pub mod resources;

pub use ami::*;
pub use instance::*;
pub use instance_type::*;
pub use ports::*;
pub use resources::ResourceList;
