//! AMI Families
//!
//! Image families a node template can select. Each family maps instance
//! architectures to the image it boots.

use crate::labels;
use crate::scheduling::Requirements;
use serde::{Deserialize, Serialize};

/// AMI family named by a node template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AmiFamily {
    #[default]
    AL2,
    Bottlerocket,
    Ubuntu,
    Windows2019,
    Windows2022,
    Custom,
}

impl AmiFamily {
    /// Resolve the family named by a template, defaulting to AL2 for unset or
    /// unknown names
    pub fn from_name(name: Option<&str>) -> Self {
        match name.unwrap_or_default() {
            "Bottlerocket" => AmiFamily::Bottlerocket,
            "Ubuntu" => AmiFamily::Ubuntu,
            "Windows2019" => AmiFamily::Windows2019,
            "Windows2022" => AmiFamily::Windows2022,
            "Custom" => AmiFamily::Custom,
            _ => AmiFamily::AL2,
        }
    }

    /// Architectures this family publishes images for
    pub fn architectures(&self) -> &'static [&'static str] {
        match self {
            AmiFamily::Windows2019 | AmiFamily::Windows2022 => &["amd64"],
            _ => &["amd64", "arm64"],
        }
    }

    /// Architecture an instance type boots with, defaulting to amd64
    pub fn architecture_for(requirements: &Requirements) -> String {
        requirements
            .get(labels::LABEL_ARCH_STABLE)
            .and_then(|requirement| requirement.single_value())
            .unwrap_or("amd64")
            .to_string()
    }
}

impl std::fmt::Display for AmiFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmiFamily::AL2 => write!(f, "AL2"),
            AmiFamily::Bottlerocket => write!(f, "Bottlerocket"),
            AmiFamily::Ubuntu => write!(f, "Ubuntu"),
            AmiFamily::Windows2019 => write!(f, "Windows2019"),
            AmiFamily::Windows2022 => write!(f, "Windows2022"),
            AmiFamily::Custom => write!(f, "Custom"),
        }
    }
}

/// Metadata about a resolved image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmiMetadata {
    pub name: String,
    pub architecture: String,
}
