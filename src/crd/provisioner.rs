//! Provisioner CRD
//!
//! The scheduling policy that owns Machines. Carries the node template either
//! inline (`provider`) or by reference (`providerRef`), and the kubelet
//! settings that shape instance-type overhead.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scheduling::NodeSelectorRequirement;

// =============================================================================
// Provisioner CRD
// =============================================================================

/// Provisioner describes the constraints and provider configuration for the
/// nodes it launches.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karpenter.sh",
    version = "v1alpha5",
    kind = "Provisioner",
    plural = "provisioners",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Template", "type": "string", "jsonPath": ".spec.providerRef.name"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerSpec {
    /// Requirements applied to every Machine this provisioner creates
    #[serde(default)]
    pub requirements: Vec<NodeSelectorRequirement>,

    /// Labels applied to every node
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Inline provider configuration. Mutually exclusive with `provider_ref`.
    #[serde(default)]
    pub provider: Option<serde_json::Value>,

    /// Reference to a node template
    #[serde(default)]
    pub provider_ref: Option<ProviderRef>,

    /// Kubelet settings, which determine instance-type overhead
    #[serde(default)]
    pub kubelet_configuration: Option<KubeletConfiguration>,
}

/// Reference to a node template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRef {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Kubelet settings relevant to allocatable resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    /// Caps the pods resource of every instance type
    #[serde(default)]
    pub max_pods: Option<i32>,

    #[serde(default)]
    pub kube_reserved: BTreeMap<String, String>,

    #[serde(default)]
    pub system_reserved: BTreeMap<String, String>,

    /// Signal -> threshold, e.g. `memory.available: 100Mi`
    #[serde(default)]
    pub eviction_hard: BTreeMap<String, String>,
}

impl Provisioner {
    /// Raw bytes of the inline provider, if any
    pub fn raw_provider(&self) -> Option<Vec<u8>> {
        self.spec
            .provider
            .as_ref()
            .and_then(|provider| serde_json::to_vec(provider).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes() {
        let spec: ProvisionerSpec = serde_json::from_value(serde_json::json!({
            "providerRef": {"name": "default"},
            "kubeletConfiguration": {
                "maxPods": 110,
                "evictionHard": {"memory.available": "100Mi"}
            }
        }))
        .unwrap();
        assert_eq!(spec.provider_ref.unwrap().name, "default");
        let kubelet = spec.kubelet_configuration.unwrap();
        assert_eq!(kubelet.max_pods, Some(110));
        assert_eq!(kubelet.eviction_hard["memory.available"], "100Mi");
    }

    #[test]
    fn test_raw_provider() {
        let mut provisioner = Provisioner::new("default", ProvisionerSpec::default());
        assert!(provisioner.raw_provider().is_none());

        provisioner.spec.provider = Some(serde_json::json!({"amiFamily": "Bottlerocket"}));
        let raw = provisioner.raw_provider().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["amiFamily"], "Bottlerocket");
    }
}
