//! In-Memory Instance Provider
//!
//! Simulates the EC2 instance lifecycle over an in-process map. Launches pick
//! the cheapest available offering across the candidate types, tag instances
//! for the cluster and owning provisioner, and resolve the boot image through
//! the AMI provider.

use crate::crd::{Machine, NodeTemplate};
use crate::domain::ports::{AmiProvider, AmiProviderRef, InstanceProvider};
use crate::domain::{AmiFamily, Instance, InstanceLifecycle, InstanceState, InstanceType, Offering};
use crate::error::{Error, Result};
use crate::labels;
use crate::scheduling::Requirements;
use crate::settings::Settings;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Instance provider backed by an in-process map
pub struct InMemoryInstanceProvider {
    settings: Arc<Settings>,
    amis: AmiProviderRef,
    instances: RwLock<BTreeMap<String, Instance>>,
    next_id: AtomicU64,
}

impl InMemoryInstanceProvider {
    pub fn new(settings: Arc<Settings>, amis: AmiProviderRef) -> Self {
        Self {
            settings,
            amis,
            instances: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add an instance as if launched out-of-band
    pub fn insert(&self, instance: Instance) {
        self.instances
            .write()
            .insert(instance.instance_id.clone(), instance);
    }

    /// Number of instances that have not terminated
    pub fn running(&self) -> usize {
        self.instances
            .read()
            .values()
            .filter(|instance| !instance.state.is_terminal())
            .count()
    }

    /// Candidate launches ordered by offering price, catalog order breaking ties
    fn launch_order<'a>(
        requirements: &Requirements,
        instance_types: &'a [InstanceType],
    ) -> Vec<(&'a InstanceType, Offering)> {
        let mut order: Vec<(&InstanceType, Offering)> = instance_types
            .iter()
            .filter_map(|instance_type| {
                instance_type
                    .offerings
                    .requirements(requirements)
                    .available()
                    .cheapest()
                    .cloned()
                    .map(|offering| (instance_type, offering))
            })
            .collect();
        order.sort_by(|(_, a), (_, b)| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        order
    }

    fn tags(&self, template: &NodeTemplate, machine: &Machine) -> BTreeMap<String, String> {
        let mut tags = template.spec.aws.tags.clone();
        tags.insert(
            labels::CLUSTER_NAME_TAG_KEY.to_string(),
            self.settings.cluster_name.clone(),
        );
        if let Some(provisioner) = machine.provisioner_name() {
            tags.insert(
                labels::PROVISIONER_NAME_LABEL_KEY.to_string(),
                provisioner.to_string(),
            );
        }
        tags
    }

    fn is_managed(&self, instance: &Instance) -> bool {
        instance.tag(labels::CLUSTER_NAME_TAG_KEY) == Some(self.settings.cluster_name.as_str())
            && instance.provisioner_name().is_some()
    }

    fn next_instance(&self) -> (String, String) {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        (
            format!("i-{:017x}", n),
            format!("ip-10-0-{}-{}.ec2.internal", (n >> 8) & 0xff, n & 0xff),
        )
    }
}

#[async_trait]
impl InstanceProvider for InMemoryInstanceProvider {
    async fn create(
        &self,
        cancel: &CancellationToken,
        template: &NodeTemplate,
        machine: &Machine,
        instance_types: &[InstanceType],
    ) -> Result<Instance> {
        let requirements =
            Requirements::from_node_selector(&machine.spec.requirements, &self.settings.normalized_labels);
        let order = Self::launch_order(&requirements, instance_types);
        let family = AmiFamily::from_name(template.spec.aws.ami_family.as_deref());

        for (instance_type, offering) in order {
            let images = self
                .amis
                .get(cancel, template, std::slice::from_ref(instance_type), family)
                .await?;
            let Some(image_id) = images.keys().next().cloned() else {
                debug!(instance_type = %instance_type.name, family = %family, "No image, skipping");
                continue;
            };

            let (instance_id, private_dns_name) = self.next_instance();
            let instance = Instance {
                instance_id: instance_id.clone(),
                image_id,
                availability_zone: offering.zone.clone(),
                instance_type: instance_type.name.clone(),
                private_dns_name,
                tags: self.tags(template, machine),
                launch_time: Utc::now(),
                instance_lifecycle: match InstanceLifecycle::from_capacity_type(&offering.capacity_type) {
                    InstanceLifecycle::Spot => Some(InstanceLifecycle::Spot),
                    InstanceLifecycle::Scheduled => None,
                },
                state: InstanceState::Running,
            };
            info!(
                id = %instance_id,
                instance_type = %instance.instance_type,
                zone = %instance.availability_zone,
                capacity_type = %offering.capacity_type,
                "Launched instance"
            );
            self.insert(instance.clone());
            return Ok(instance);
        }

        Err(Error::InsufficientCapacity(format!(
            "no available offering for {} instance types",
            instance_types.len()
        )))
    }

    async fn get(&self, _cancel: &CancellationToken, id: &str) -> Result<Instance> {
        self.instances
            .read()
            .get(id)
            .filter(|instance| !instance.state.is_terminal())
            .cloned()
            .ok_or_else(|| Error::not_found("Instance", id))
    }

    async fn list(&self, _cancel: &CancellationToken) -> Result<Vec<Instance>> {
        Ok(self
            .instances
            .read()
            .values()
            .filter(|instance| !instance.state.is_terminal() && self.is_managed(instance))
            .cloned()
            .collect())
    }

    async fn delete(&self, _cancel: &CancellationToken, id: &str) -> Result<()> {
        let mut instances = self.instances.write();
        match instances.get_mut(id) {
            Some(instance) if !instance.state.is_terminal() => {
                instance.state = InstanceState::ShuttingDown;
                debug!(id = %id, "Terminating instance");
                Ok(())
            }
            _ => Err(Error::not_found("Instance", id)),
        }
    }

    async fn link(&self, _cancel: &CancellationToken, id: &str) -> Result<()> {
        let mut instances = self.instances.write();
        match instances.get_mut(id) {
            Some(instance) if !instance.state.is_terminal() => {
                instance.tags.insert(
                    labels::MANAGED_BY_LABEL_KEY.to_string(),
                    self.settings.cluster_name.clone(),
                );
                Ok(())
            }
            _ => Err(Error::not_found("Instance", id)),
        }
    }
}
