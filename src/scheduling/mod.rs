//! Scheduling Module
//!
//! Requirement algebra and instance-type eligibility matching.

pub mod matcher;
pub mod requirements;

pub use matcher::*;
pub use requirements::*;
