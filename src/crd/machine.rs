//! Machine CRD
//!
//! The autoscaler's request for a node, and the projection of a running cloud
//! instance back into that shape.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::provisioner::KubeletConfiguration;
use crate::labels;
use crate::scheduling::NodeSelectorRequirement;

// =============================================================================
// Machine CRD
// =============================================================================

/// Machine is a declarative request for a node carrying resource and topology
/// constraints. The owning provisioner is recorded in the
/// `karpenter.sh/provisioner-name` label.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karpenter.sh",
    version = "v1alpha5",
    kind = "Machine",
    plural = "machines",
    status = "MachineStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".metadata.labels.node\\.kubernetes\\.io/instance-type"}"#,
    printcolumn = r#"{"name": "Zone", "type": "string", "jsonPath": ".metadata.labels.topology\\.kubernetes\\.io/zone"}"#,
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".metadata.labels.karpenter\\.sh/provisioner-name"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Scheduling requirements the launched instance must satisfy
    #[serde(default)]
    pub requirements: Vec<NodeSelectorRequirement>,

    /// Resources the launched instance must have room for
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Kubelet overrides for the launched node
    #[serde(default)]
    pub kubelet: Option<KubeletConfiguration>,

    /// Reference to the node template governing the launch
    #[serde(default)]
    pub machine_template_ref: Option<MachineTemplateRef>,
}

/// Requested resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

/// Reference to a node template by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateRef {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of the Machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// `<scheme>:///<zone>/<instance-id>`
    #[serde(default)]
    pub provider_id: String,

    /// Resources on the node, zero quantities excluded
    #[serde(default)]
    pub capacity: BTreeMap<String, Quantity>,

    /// Resources available to pods, zero quantities excluded
    #[serde(default)]
    pub allocatable: BTreeMap<String, Quantity>,
}

impl Machine {
    /// Name of the owning provisioner
    pub fn provisioner_name(&self) -> Option<&str> {
        self.label(labels::PROVISIONER_NAME_LABEL_KEY)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// Inline provider spec carried in the compatibility annotation
    pub fn raw_provider(&self) -> Option<&[u8]> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(labels::PROVIDER_COMPATIBILITY_ANNOTATION_KEY))
            .map(String::as_bytes)
    }

    /// Provider identity recorded in status, empty when never launched
    pub fn provider_id(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.provider_id.as_str())
            .unwrap_or_default()
    }

    /// Name for log fields, empty for translated machines not yet named
    pub fn name_or_empty(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}
