//! AWSNodeTemplate CRD
//!
//! Provider configuration for launched instances. The `AwsProvider` part can
//! also travel inline, serialized, on a Provisioner or Machine.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

// =============================================================================
// AWSNodeTemplate CRD
// =============================================================================

/// Node template governing image selection, networking and launch templates
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karpenter.k8s.aws",
    version = "v1alpha1",
    kind = "AWSNodeTemplate",
    root = "NodeTemplate",
    plural = "awsnodetemplates",
    derive = "PartialEq",
    printcolumn = r#"{"name": "AMIFamily", "type": "string", "jsonPath": ".spec.amiFamily"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplateSpec {
    #[serde(flatten)]
    pub aws: AwsProvider,

    /// Tags selecting custom AMIs
    #[serde(default)]
    pub ami_selector: BTreeMap<String, String>,

    /// User data merged into the launch template
    #[serde(default)]
    pub user_data: Option<String>,
}

/// Provider-specific launch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsProvider {
    /// AMI family used to resolve images, defaults to AL2
    #[serde(default)]
    pub ami_family: Option<String>,

    /// When set, image selection is owned entirely by this launch template
    #[serde(default)]
    pub launch_template_name: Option<String>,

    #[serde(default)]
    pub instance_profile: Option<String>,

    #[serde(default)]
    pub subnet_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub security_group_selector: BTreeMap<String, String>,

    /// Tags applied to launched instances
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Capacity reservation or placement context
    #[serde(default)]
    pub context: Option<String>,
}

impl AwsProvider {
    /// Deserialize an inline provider spec
    pub fn deserialize(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

impl NodeTemplate {
    /// Wrap an inline provider into a template with empty metadata
    pub fn from_provider(aws: AwsProvider) -> Self {
        Self {
            metadata: Default::default(),
            spec: NodeTemplateSpec {
                aws,
                ..Default::default()
            },
        }
    }

    pub fn launch_template_name(&self) -> Option<&str> {
        self.spec.aws.launch_template_name.as_deref()
    }
}
