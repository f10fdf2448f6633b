//! Static Instance Type Catalog
//!
//! Instance types loaded once from a YAML file. Each listing derives the
//! well-known requirement dimensions from the entry and its offerings, and
//! computes overhead from the provisioner's kubelet settings.

use crate::crd::{KubeletConfiguration, NodeTemplate};
use crate::domain::ports::InstanceTypeCatalog;
use crate::domain::resources::{self, ResourceList};
use crate::domain::{AmiFamily, InstanceType, InstanceTypeOverhead, Offering, Offerings};
use crate::error::{Error, Result};
use crate::labels;
use crate::scheduling::{Operator, Requirement, Requirements};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Eviction threshold applied when the kubelet sets none
pub const DEFAULT_EVICTION_MEMORY: &str = "100Mi";

const EVICTION_MEMORY_SIGNAL: &str = "memory.available";

// =============================================================================
// File Format
// =============================================================================

/// Catalog file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogFile {
    pub instance_types: Vec<CatalogEntry>,
    pub images: Vec<super::ami::ImageEntry>,
}

impl CatalogFile {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

/// One instance type as described in the catalog file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    /// Label key -> admitted values
    #[serde(default)]
    pub requirements: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub offerings: Vec<Offering>,
    #[serde(default)]
    pub capacity: ResourceList,
}

// =============================================================================
// Static Catalog
// =============================================================================

/// Catalog serving a fixed list of instance types in file order
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalog {
    /// Build a catalog, rejecting unparseable capacities up front
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self> {
        for entry in &entries {
            if entry.name.is_empty() {
                return Err(Error::Configuration("instance type without a name".into()));
            }
            for (resource, quantity) in &entry.capacity {
                resources::parse_nanos(quantity).map_err(|err| {
                    Error::Configuration(format!(
                        "instance type {} capacity {}: {}",
                        entry.name, resource, err
                    ))
                })?;
            }
        }
        info!(instance_types = entries.len(), "Loaded instance type catalog");
        Ok(Self { entries })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(CatalogFile::from_file(path)?.instance_types)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn instance_type(
        &self,
        entry: &CatalogEntry,
        family: AmiFamily,
        kubelet: Option<&KubeletConfiguration>,
    ) -> Result<InstanceType> {
        let mut capacity = entry.capacity.clone();
        if let Some(max_pods) = kubelet.and_then(|k| k.max_pods) {
            capacity.insert("pods".to_string(), Quantity(max_pods.to_string()));
        }
        let overhead = overhead(&capacity, kubelet)?;
        Ok(InstanceType::new(
            entry.name.clone(),
            requirements(entry, family),
            Offerings(entry.offerings.clone()),
            capacity,
            overhead,
        ))
    }
}

#[async_trait]
impl InstanceTypeCatalog for StaticCatalog {
    async fn list(
        &self,
        _cancel: &CancellationToken,
        kubelet: Option<&KubeletConfiguration>,
        template: &NodeTemplate,
    ) -> Result<Vec<InstanceType>> {
        let family = AmiFamily::from_name(template.spec.aws.ami_family.as_deref());
        debug!(family = %family, "Listing instance types");
        self.entries
            .iter()
            .map(|entry| self.instance_type(entry, family, kubelet))
            .collect()
    }

    fn liveness_probe(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::Internal("instance type catalog is empty".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Derivation
// =============================================================================

/// Entry requirements plus the dimensions implied by its name, offerings and
/// image family. Explicit entry requirements win.
fn requirements(entry: &CatalogEntry, family: AmiFamily) -> Requirements {
    let zones: BTreeSet<&str> = entry.offerings.iter().map(|o| o.zone.as_str()).collect();
    let capacity_types: BTreeSet<&str> = entry
        .offerings
        .iter()
        .map(|o| o.capacity_type.as_str())
        .collect();
    let os = match family {
        AmiFamily::Windows2019 | AmiFamily::Windows2022 => "windows",
        _ => "linux",
    };

    let mut requirements: Requirements = entry
        .requirements
        .iter()
        .map(|(key, values)| Requirement::new(key.clone(), Operator::In, values.iter().cloned()))
        .collect();
    let derived = [
        Requirement::new(labels::LABEL_INSTANCE_TYPE_STABLE, Operator::In, [entry.name.as_str()]),
        Requirement::new(labels::LABEL_TOPOLOGY_ZONE, Operator::In, zones),
        Requirement::new(labels::LABEL_CAPACITY_TYPE, Operator::In, capacity_types),
        Requirement::new(labels::LABEL_OS_STABLE, Operator::In, [os]),
        Requirement::new(labels::LABEL_ARCH_STABLE, Operator::In, ["amd64"]),
    ];
    for requirement in derived {
        if !requirements.has(&requirement.key) {
            requirements.add(requirement);
        }
    }
    requirements
}

/// Reserved resources for the kubelet settings
fn overhead(capacity: &ResourceList, kubelet: Option<&KubeletConfiguration>) -> Result<InstanceTypeOverhead> {
    let Some(kubelet) = kubelet else {
        return Ok(InstanceTypeOverhead {
            eviction_threshold: eviction_threshold(capacity, DEFAULT_EVICTION_MEMORY)?,
            ..Default::default()
        });
    };
    let threshold = kubelet
        .eviction_hard
        .get(EVICTION_MEMORY_SIGNAL)
        .map(String::as_str)
        .unwrap_or(DEFAULT_EVICTION_MEMORY);
    Ok(InstanceTypeOverhead {
        kube_reserved: reserved(&kubelet.kube_reserved)?,
        system_reserved: reserved(&kubelet.system_reserved)?,
        eviction_threshold: eviction_threshold(capacity, threshold)?,
    })
}

fn reserved(values: &BTreeMap<String, String>) -> Result<ResourceList> {
    values
        .iter()
        .map(|(resource, value)| {
            let quantity = Quantity(value.clone());
            resources::parse_nanos(&quantity)
                .map_err(|err| Error::Configuration(format!("reserved {}: {}", resource, err)))?;
            Ok((resource.clone(), quantity))
        })
        .collect()
}

/// Memory held back for hard eviction, either absolute or a percentage of
/// memory capacity
fn eviction_threshold(capacity: &ResourceList, threshold: &str) -> Result<ResourceList> {
    let quantity = match threshold.strip_suffix('%') {
        Some(percent) => {
            let percent: f64 = percent.trim().parse().map_err(|_| {
                Error::Configuration(format!("eviction threshold {:?} is not a percentage", threshold))
            })?;
            let memory = match capacity.get("memory") {
                Some(memory) => resources::parse_nanos(memory)?,
                None => 0,
            };
            resources::format_nanos(((memory as f64) * percent / 100.0).ceil() as i128)
        }
        None => {
            let quantity = Quantity(threshold.to_string());
            resources::parse_nanos(&quantity)
                .map_err(|err| Error::Configuration(format!("eviction threshold: {}", err)))?;
            quantity
        }
    };
    Ok(BTreeMap::from([("memory".to_string(), quantity)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NodeTemplateSpec;
    use std::io::Write;

    const CATALOG: &str = r#"
instanceTypes:
  - name: m5.large
    requirements:
      karpenter.k8s.aws/instance-family: [m5]
    offerings:
      - zone: us-east-1a
        capacityType: on-demand
        price: 0.096
      - zone: us-east-1b
        capacityType: spot
        price: 0.035
    capacity:
      cpu: "2"
      memory: 8Gi
      pods: "29"
  - name: m6g.large
    requirements:
      kubernetes.io/arch: [arm64]
    offerings:
      - zone: us-east-1a
        capacityType: on-demand
        price: 0.077
        available: false
    capacity:
      cpu: "2"
      memory: 8Gi
images:
  - family: AL2
    architecture: amd64
    id: ami-amd64
    name: amazon-eks-node-1.29
"#;

    fn template(family: Option<&str>) -> NodeTemplate {
        let mut template = NodeTemplate::new("default", NodeTemplateSpec::default());
        template.spec.aws.ami_family = family.map(String::from);
        template
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(CatalogFile::from_yaml(CATALOG).unwrap().instance_types).unwrap()
    }

    #[tokio::test]
    async fn test_derives_requirements() {
        let cancel = CancellationToken::new();
        let types = catalog().list(&cancel, None, &template(None)).await.unwrap();

        assert_eq!(types.len(), 2);
        let m5 = &types[0];
        assert_eq!(m5.name, "m5.large");
        assert!(m5.requirements.admits(labels::LABEL_INSTANCE_TYPE_STABLE, "m5.large"));
        assert!(m5.requirements.admits(labels::LABEL_TOPOLOGY_ZONE, "us-east-1b"));
        assert!(!m5.requirements.admits(labels::LABEL_TOPOLOGY_ZONE, "us-east-1c"));
        assert!(m5.requirements.admits(labels::LABEL_CAPACITY_TYPE, "spot"));
        assert!(m5.requirements.admits(labels::LABEL_OS_STABLE, "linux"));
        assert!(m5.requirements.admits(labels::LABEL_ARCH_STABLE, "amd64"));
        assert!(m5.requirements.admits(labels::LABEL_INSTANCE_FAMILY, "m5"));

        // Explicit architecture is kept
        let m6g = &types[1];
        assert!(m6g.requirements.admits(labels::LABEL_ARCH_STABLE, "arm64"));
        assert!(!m6g.requirements.admits(labels::LABEL_ARCH_STABLE, "amd64"));
        assert!(!m6g.offerings.iter().next().unwrap().available);
    }

    #[tokio::test]
    async fn test_windows_family_sets_os() {
        let cancel = CancellationToken::new();
        let types = catalog()
            .list(&cancel, None, &template(Some("Windows2022")))
            .await
            .unwrap();
        assert!(types[0].requirements.admits(labels::LABEL_OS_STABLE, "windows"));
        assert!(!types[0].requirements.admits(labels::LABEL_OS_STABLE, "linux"));
    }

    #[tokio::test]
    async fn test_kubelet_overhead() {
        let cancel = CancellationToken::new();
        let kubelet = KubeletConfiguration {
            max_pods: Some(110),
            kube_reserved: BTreeMap::from([
                ("cpu".to_string(), "100m".to_string()),
                ("memory".to_string(), "1Gi".to_string()),
            ]),
            system_reserved: BTreeMap::from([("cpu".to_string(), "100m".to_string())]),
            eviction_hard: BTreeMap::from([(EVICTION_MEMORY_SIGNAL.to_string(), "10%".to_string())]),
        };
        let types = catalog()
            .list(&cancel, Some(&kubelet), &template(None))
            .await
            .unwrap();
        let m5 = &types[0];

        assert_eq!(m5.capacity["pods"], Quantity("110".into()));
        let allocatable = m5.allocatable();
        assert_eq!(
            resources::parse_nanos(&allocatable["cpu"]).unwrap(),
            resources::parse_nanos(&Quantity("1800m".into())).unwrap()
        );
        // 8Gi - 1Gi - 10% of 8Gi
        let expected = 8 * (1i128 << 30) - (1i128 << 30) - (8 * (1i128 << 30)) / 10;
        let memory = resources::parse_nanos(&allocatable["memory"]).unwrap();
        assert!((memory / 1_000_000_000 - expected).abs() <= 1);
    }

    #[tokio::test]
    async fn test_default_eviction_threshold() {
        let cancel = CancellationToken::new();
        let types = catalog().list(&cancel, None, &template(None)).await.unwrap();
        assert_eq!(
            types[0].overhead.eviction_threshold["memory"],
            Quantity(DEFAULT_EVICTION_MEMORY.into())
        );
    }

    #[test]
    fn test_rejects_bad_capacity() {
        let entry = CatalogEntry {
            name: "broken".into(),
            capacity: BTreeMap::from([("cpu".to_string(), Quantity("lots".into()))]),
            ..Default::default()
        };
        assert!(matches!(StaticCatalog::new(vec![entry]), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_liveness_and_file_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = StaticCatalog::from_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.liveness_probe().is_ok());

        let empty = StaticCatalog::new(Vec::new()).unwrap();
        assert!(empty.liveness_probe().is_err());
    }
}
