//! Instance to Machine Translation
//!
//! Projects a cloud instance, and the instance type it was matched to, into
//! the scheduler's Machine shape. Pure: the same inputs and settings always
//! produce the same Machine.

use super::provider_id::format_provider_id;
use crate::crd::{Machine, MachineSpec, MachineStatus};
use crate::domain::resources;
use crate::domain::{Instance, InstanceType};
use crate::labels;
use crate::settings::{NodeNameConvention, Settings};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;

/// Translate an instance into a Machine. Without an instance type, capacity,
/// allocatable and per-dimension labels are left out.
pub fn instance_to_machine(
    settings: &Settings,
    instance: &Instance,
    instance_type: Option<&InstanceType>,
) -> Machine {
    let mut node_labels = BTreeMap::new();
    let mut status = MachineStatus::default();

    if let Some(instance_type) = instance_type {
        for (key, requirement) in instance_type.requirements.iter() {
            if let Some(value) = requirement.single_value() {
                node_labels.insert(key.clone(), value.to_string());
            }
        }
        status.capacity = resources::filter_zero(&instance_type.capacity);
        status.allocatable = resources::filter_zero(&instance_type.allocatable());
    }

    node_labels.insert(labels::LABEL_INSTANCE_AMI_ID.to_string(), instance.image_id.clone());
    node_labels.insert(
        labels::LABEL_TOPOLOGY_ZONE.to_string(),
        instance.availability_zone.clone(),
    );
    node_labels.insert(
        labels::LABEL_CAPACITY_TYPE.to_string(),
        instance.capacity_type().to_string(),
    );
    for key in [labels::PROVISIONER_NAME_LABEL_KEY, labels::MANAGED_BY_LABEL_KEY] {
        if let Some(value) = instance.tag(key) {
            node_labels.insert(key.to_string(), value.to_string());
        }
    }

    let name = match settings.node_name_convention {
        NodeNameConvention::ResourceName => instance.instance_id.clone(),
        NodeNameConvention::IpName => instance.private_dns_name.to_lowercase(),
    };

    status.provider_id = format_provider_id(
        &settings.provider_id_scheme,
        &instance.availability_zone,
        &instance.instance_id,
    );

    let mut machine = Machine::new(&name, MachineSpec::default());
    machine.metadata.labels = Some(node_labels);
    machine.metadata.creation_timestamp = Some(Time(instance.launch_time));
    machine.status = Some(status);
    machine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudprovider::provider_id::parse_instance_id;
    use crate::domain::{InstanceLifecycle, InstanceState, InstanceTypeOverhead, Offerings};
    use crate::scheduling::{Operator, Requirement, Requirements};
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn instance() -> Instance {
        Instance {
            instance_id: "i-0123456789abcdef0".into(),
            image_id: "ami-1".into(),
            availability_zone: "us-east-1a".into(),
            instance_type: "large".into(),
            private_dns_name: "IP-10-0-0-1.EC2.Internal".into(),
            tags: BTreeMap::from([
                (labels::PROVISIONER_NAME_LABEL_KEY.to_string(), "X".to_string()),
                (labels::MANAGED_BY_LABEL_KEY.to_string(), "Y".to_string()),
                ("Name".to_string(), "ignored".to_string()),
            ]),
            launch_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            instance_lifecycle: Some(InstanceLifecycle::Spot),
            state: InstanceState::Running,
        }
    }

    fn large(requirements: Requirements) -> InstanceType {
        InstanceType::new(
            "large",
            requirements,
            Offerings::default(),
            BTreeMap::from([
                ("cpu".to_string(), Quantity("4".into())),
                ("memory".to_string(), Quantity("16Gi".into())),
                ("pods".to_string(), Quantity("0".into())),
            ]),
            InstanceTypeOverhead::default(),
        )
    }

    fn label_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_translates_tagged_spot_instance() {
        let settings = Settings::default();
        let machine = instance_to_machine(&settings, &instance(), Some(&large(Requirements::new())));

        assert_eq!(
            machine.metadata.labels.clone().unwrap(),
            label_map(&[
                (labels::PROVISIONER_NAME_LABEL_KEY, "X"),
                (labels::MANAGED_BY_LABEL_KEY, "Y"),
                (labels::LABEL_TOPOLOGY_ZONE, "us-east-1a"),
                (labels::LABEL_CAPACITY_TYPE, "spot"),
                (labels::LABEL_INSTANCE_AMI_ID, "ami-1"),
            ])
        );

        let status = machine.status.clone().unwrap();
        assert_eq!(
            status.capacity,
            BTreeMap::from([
                ("cpu".to_string(), Quantity("4".into())),
                ("memory".to_string(), Quantity("16Gi".into())),
            ])
        );
        assert!(!status.allocatable.contains_key("pods"));
        assert_eq!(status.provider_id, "aws:///us-east-1a/i-0123456789abcdef0");
        assert_eq!(parse_instance_id(&status.provider_id).unwrap(), "i-0123456789abcdef0");
        assert_eq!(machine.name_or_empty(), "ip-10-0-0-1.ec2.internal");
        assert_eq!(
            machine.metadata.creation_timestamp,
            Some(Time(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_single_valued_dimensions_become_labels() {
        let requirements: Requirements = [
            Requirement::new(labels::LABEL_INSTANCE_TYPE_STABLE, Operator::In, ["large"]),
            Requirement::new(labels::LABEL_ARCH_STABLE, Operator::In, ["amd64"]),
            Requirement::new(labels::LABEL_TOPOLOGY_ZONE, Operator::In, ["us-east-1a", "us-east-1b"]),
            Requirement::new(labels::LABEL_INSTANCE_FAMILY, Operator::NotIn, ["m5"]),
        ]
        .into_iter()
        .collect();
        let machine = instance_to_machine(&Settings::default(), &instance(), Some(&large(requirements)));
        let node_labels = machine.metadata.labels.unwrap();

        assert_eq!(node_labels[labels::LABEL_INSTANCE_TYPE_STABLE], "large");
        assert_eq!(node_labels[labels::LABEL_ARCH_STABLE], "amd64");
        // Multi-valued dimension skipped; placement label always wins
        assert_eq!(node_labels[labels::LABEL_TOPOLOGY_ZONE], "us-east-1a");
        assert!(!node_labels.contains_key(labels::LABEL_INSTANCE_FAMILY));
    }

    #[test]
    fn test_without_instance_type() {
        let mut instance = instance();
        instance.tags.clear();
        instance.instance_lifecycle = None;
        let settings = Settings {
            node_name_convention: NodeNameConvention::ResourceName,
            ..Default::default()
        };
        let machine = instance_to_machine(&settings, &instance, None);

        assert_eq!(machine.name_or_empty(), "i-0123456789abcdef0");
        assert_eq!(
            machine.metadata.labels.clone().unwrap(),
            label_map(&[
                (labels::LABEL_TOPOLOGY_ZONE, "us-east-1a"),
                (labels::LABEL_CAPACITY_TYPE, "on-demand"),
                (labels::LABEL_INSTANCE_AMI_ID, "ami-1"),
            ])
        );
        let status = machine.status.unwrap();
        assert!(status.capacity.is_empty());
        assert!(status.allocatable.is_empty());
    }

    #[test]
    fn test_translation_is_deterministic() {
        let settings = Settings::default();
        let it = large(Requirements::new());
        let first = serde_json::to_vec(&instance_to_machine(&settings, &instance(), Some(&it))).unwrap();
        let second = serde_json::to_vec(&instance_to_machine(&settings, &instance(), Some(&it))).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_uses_configured_scheme() {
        let settings = Settings {
            provider_id_scheme: "aws-gov".into(),
            ..Default::default()
        };
        let machine = instance_to_machine(&settings, &instance(), None);
        assert_eq!(machine.provider_id(), "aws-gov:///us-east-1a/i-0123456789abcdef0");
    }
}
