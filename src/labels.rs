//! Well-known label and tag keys
//!
//! Keys shared between instance-type requirements, instance tags and the
//! labels placed on translated Machines.

use std::collections::BTreeMap;

// =============================================================================
// Kubernetes Labels
// =============================================================================

pub const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";
pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
pub const LABEL_INSTANCE_TYPE_STABLE: &str = "node.kubernetes.io/instance-type";
pub const LABEL_ARCH_STABLE: &str = "kubernetes.io/arch";
pub const LABEL_OS_STABLE: &str = "kubernetes.io/os";

// =============================================================================
// Autoscaler Labels
// =============================================================================

pub const LABEL_CAPACITY_TYPE: &str = "karpenter.sh/capacity-type";
pub const PROVISIONER_NAME_LABEL_KEY: &str = "karpenter.sh/provisioner-name";
pub const MANAGED_BY_LABEL_KEY: &str = "karpenter.sh/managed-by";

/// Annotation carrying an inline, serialized provider spec on a Machine
pub const PROVIDER_COMPATIBILITY_ANNOTATION_KEY: &str = "karpenter.sh/compatibility-provider";

pub const CAPACITY_TYPE_SPOT: &str = "spot";
pub const CAPACITY_TYPE_ON_DEMAND: &str = "on-demand";

// =============================================================================
// Provider Labels
// =============================================================================

pub const LABEL_INSTANCE_AMI_ID: &str = "karpenter.k8s.aws/instance-ami-id";
pub const LABEL_INSTANCE_CATEGORY: &str = "karpenter.k8s.aws/instance-category";
pub const LABEL_INSTANCE_FAMILY: &str = "karpenter.k8s.aws/instance-family";
pub const LABEL_INSTANCE_SIZE: &str = "karpenter.k8s.aws/instance-size";
pub const LABEL_INSTANCE_CPU: &str = "karpenter.k8s.aws/instance-cpu";
pub const LABEL_INSTANCE_MEMORY: &str = "karpenter.k8s.aws/instance-memory";

/// Tag carrying the cluster an instance was launched for
pub const CLUSTER_NAME_TAG_KEY: &str = "karpenter.sh/cluster-name";

/// Zone label published by the EBS CSI driver
pub const LABEL_EBS_CSI_ZONE: &str = "topology.ebs.csi.aws.com/zone";

/// Label aliases contributed by this provider, mapping alias -> canonical key
pub fn default_normalized_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_EBS_CSI_ZONE.to_string(), LABEL_TOPOLOGY_ZONE.to_string())])
}

/// Rewrite a label key through a normalization table
pub fn normalize<'a>(normalized: &'a BTreeMap<String, String>, key: &'a str) -> &'a str {
    normalized.get(key).map(String::as_str).unwrap_or(key)
}
