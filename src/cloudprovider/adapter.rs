//! EC2 Cloud Provider
//!
//! Composes the object store, instance-type catalog, instance lifecycle
//! provider and AMI resolver into the `CloudProvider` contract. Holds no
//! mutable state of its own; calls may run concurrently.

use super::drift::is_ami_drifted;
use super::provider_id::parse_instance_id;
use super::template::resolve_node_template;
use super::translate::instance_to_machine;
use super::CloudProvider;
use crate::crd::{Machine, NodeTemplate, Provisioner};
use crate::domain::ports::{
    cancellable, AmiProviderRef, InstanceProviderRef, InstanceTypeCatalogRef, ObjectStoreRef,
};
use crate::domain::{Instance, InstanceType};
use crate::error::{ignore_not_found, Error, Result, StageExt};
use crate::metrics::ProviderMetrics;
use crate::scheduling::{compatible_instance_types, Requirements};
use crate::settings::Settings;
use async_trait::async_trait;
use futures::future::join_all;
use hyper::{Body, Request};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Provider identifier reported to the autoscaler
pub const PROVIDER_NAME: &str = "aws";

// =============================================================================
// Collaborators
// =============================================================================

/// External systems the provider composes
#[derive(Clone)]
pub struct Collaborators {
    pub store: ObjectStoreRef,
    pub catalog: InstanceTypeCatalogRef,
    pub instances: InstanceProviderRef,
    pub amis: AmiProviderRef,
}

// =============================================================================
// AWS Cloud Provider
// =============================================================================

/// `CloudProvider` backed by EC2
pub struct AwsCloudProvider {
    settings: Arc<Settings>,
    store: ObjectStoreRef,
    catalog: InstanceTypeCatalogRef,
    instances: InstanceProviderRef,
    amis: AmiProviderRef,
    metrics: Option<Arc<ProviderMetrics>>,
}

impl AwsCloudProvider {
    /// Create a provider over its collaborators
    pub fn new(settings: Arc<Settings>, collaborators: Collaborators) -> Self {
        Self {
            settings,
            store: collaborators.store,
            catalog: collaborators.catalog,
            instances: collaborators.instances,
            amis: collaborators.amis,
            metrics: None,
        }
    }

    /// Record operation outcomes on `metrics`
    pub fn with_metrics(mut self, metrics: Arc<ProviderMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn observed<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        if let Some(metrics) = &self.metrics {
            metrics.observe(operation, &result, started.elapsed());
        }
        result
    }

    // =========================================================================
    // Operations
    // =========================================================================

    async fn create_machine(&self, cancel: &CancellationToken, machine: &Machine) -> Result<Machine> {
        let template_ref = machine
            .spec
            .machine_template_ref
            .as_ref()
            .map(|r| r.name.as_str());
        let template = resolve_node_template(self.store.as_ref(), cancel, machine.raw_provider(), template_ref)
            .await
            .stage("resolving node template")?;

        let instance_types = self
            .resolve_instance_types(cancel, machine)
            .await
            .stage("resolving instance types")?;
        if instance_types.is_empty() {
            return Err(Error::InsufficientCapacity(
                "all requested instance types were unavailable during launch".into(),
            ));
        }

        let candidates = &instance_types[..instance_types.len().min(self.settings.max_instance_types)];
        debug!(
            machine = %machine.name_or_empty(),
            eligible = instance_types.len(),
            candidates = candidates.len(),
            "Launching instance"
        );
        let instance = cancellable(cancel, self.instances.create(cancel, &template, machine, candidates))
            .await
            .stage("creating instance")?;

        let instance_type = instance_types
            .iter()
            .find(|it| it.name == instance.instance_type);
        info!(
            machine = %machine.name_or_empty(),
            id = %instance.instance_id,
            instance_type = %instance.instance_type,
            zone = %instance.availability_zone,
            "Launched instance"
        );
        Ok(instance_to_machine(&self.settings, &instance, instance_type))
    }

    async fn get_machine(&self, cancel: &CancellationToken, provider_id: &str) -> Result<Machine> {
        let id = parse_instance_id(provider_id).stage("getting instance ID")?;
        let instance = cancellable(cancel, self.instances.get(cancel, &id))
            .await
            .stage("getting instance")?;
        let instance_type = self
            .resolve_instance_type_from_instance(cancel, &instance)
            .await
            .stage("resolving instance type")?;
        Ok(instance_to_machine(&self.settings, &instance, instance_type.as_ref()))
    }

    async fn list_machines(&self, cancel: &CancellationToken) -> Result<Vec<Machine>> {
        let instances = cancellable(cancel, self.instances.list(cancel))
            .await
            .stage("listing instances")?;

        let resolutions = join_all(
            instances
                .iter()
                .map(|instance| self.resolve_instance_type_from_instance(cancel, instance)),
        )
        .await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        Ok(instances
            .iter()
            .zip(resolutions)
            .map(|(instance, resolution)| {
                let instance_type = resolution.unwrap_or_else(|err| {
                    warn!(
                        id = %instance.instance_id,
                        error = %err,
                        "Failed resolving instance type, continuing without it"
                    );
                    None
                });
                instance_to_machine(&self.settings, instance, instance_type.as_ref())
            })
            .collect())
    }

    async fn delete_machine(&self, cancel: &CancellationToken, machine: &Machine) -> Result<()> {
        let id = parse_instance_id(machine.provider_id()).stage("getting instance ID")?;
        info!(machine = %machine.name_or_empty(), id = %id, "Deleting instance");
        cancellable(cancel, self.instances.delete(cancel, &id))
            .await
            .stage("deleting instance")
    }

    async fn link_machine(&self, cancel: &CancellationToken, machine: &Machine) -> Result<()> {
        let id = parse_instance_id(machine.provider_id()).stage("getting instance ID")?;
        info!(machine = %machine.name_or_empty(), id = %id, "Linking instance");
        cancellable(cancel, self.instances.link(cancel, &id))
            .await
            .stage("linking instance")
    }

    async fn instance_types_for(
        &self,
        cancel: &CancellationToken,
        provisioner: &Provisioner,
    ) -> Result<Vec<InstanceType>> {
        let raw = provisioner.raw_provider();
        let template_ref = provisioner.spec.provider_ref.as_ref().map(|r| r.name.as_str());
        let template = resolve_node_template(self.store.as_ref(), cancel, raw.as_deref(), template_ref)
            .await
            .stage("resolving node template")?;
        cancellable(
            cancel,
            self.catalog
                .list(cancel, provisioner.spec.kubelet_configuration.as_ref(), &template),
        )
        .await
        .stage("listing instance types")
    }

    async fn drifted(&self, cancel: &CancellationToken, machine: &Machine) -> Result<bool> {
        let Some(provisioner_name) = machine.provisioner_name() else {
            return Ok(false);
        };
        let provisioner = cancellable(cancel, self.store.get_provisioner(cancel, provisioner_name))
            .await
            .stage("getting provisioner");
        let Some(provisioner) = ignore_not_found(provisioner)? else {
            return Ok(false);
        };
        let Some(provider_ref) = provisioner.spec.provider_ref.as_ref() else {
            return Ok(false);
        };
        let template = resolve_node_template(self.store.as_ref(), cancel, None, Some(&provider_ref.name))
            .await
            .stage("resolving node template");
        let Some(template) = ignore_not_found(template)? else {
            return Ok(false);
        };
        self.is_ami_drifted(cancel, machine, &provisioner, &template).await
    }

    async fn is_ami_drifted(
        &self,
        cancel: &CancellationToken,
        machine: &Machine,
        provisioner: &Provisioner,
        template: &NodeTemplate,
    ) -> Result<bool> {
        let instance_types = self
            .instance_types_for(cancel, provisioner)
            .await
            .stage("getting instanceTypes")?;
        is_ami_drifted(
            self.amis.as_ref(),
            self.instances.as_ref(),
            cancel,
            machine,
            instance_types,
            template,
        )
        .await
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Eligible instance types for a machine, in catalog order
    async fn resolve_instance_types(
        &self,
        cancel: &CancellationToken,
        machine: &Machine,
    ) -> Result<Vec<InstanceType>> {
        let provisioner_name = machine
            .provisioner_name()
            .ok_or_else(|| Error::Resolution("finding provisioner owner".into()))?;
        let provisioner = cancellable(cancel, self.store.get_provisioner(cancel, provisioner_name))
            .await
            .stage("getting provisioner owner")?;
        let instance_types = self
            .instance_types_for(cancel, &provisioner)
            .await
            .stage("getting instance types")?;

        let requirements =
            Requirements::from_node_selector(&machine.spec.requirements, &self.settings.normalized_labels);
        Ok(compatible_instance_types(
            &requirements,
            &machine.spec.resources.requests,
            instance_types,
        ))
    }

    /// Instance type of a running instance, `None` when its owner is gone or
    /// the catalog no longer lists it
    async fn resolve_instance_type_from_instance(
        &self,
        cancel: &CancellationToken,
        instance: &Instance,
    ) -> Result<Option<InstanceType>> {
        let provisioner = self
            .resolve_provisioner_from_instance(cancel, instance)
            .await
            .stage("resolving provisioner");
        let Some(provisioner) = ignore_not_found(provisioner)? else {
            return Ok(None);
        };
        let instance_types = self
            .instance_types_for(cancel, &provisioner)
            .await
            .stage("getting instance types");
        let Some(instance_types) = ignore_not_found(instance_types)? else {
            return Ok(None);
        };
        Ok(instance_types
            .into_iter()
            .find(|it| it.name == instance.instance_type))
    }

    async fn resolve_provisioner_from_instance(
        &self,
        cancel: &CancellationToken,
        instance: &Instance,
    ) -> Result<Provisioner> {
        let name = instance
            .provisioner_name()
            .ok_or_else(|| Error::not_found("Provisioner", ""))?;
        cancellable(cancel, self.store.get_provisioner(cancel, name)).await
    }
}

#[async_trait]
impl CloudProvider for AwsCloudProvider {
    async fn create(&self, cancel: &CancellationToken, machine: &Machine) -> Result<Machine> {
        self.observed("create", self.create_machine(cancel, machine)).await
    }

    async fn get(&self, cancel: &CancellationToken, provider_id: &str) -> Result<Machine> {
        self.observed("get", self.get_machine(cancel, provider_id)).await
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Machine>> {
        self.observed("list", self.list_machines(cancel)).await
    }

    async fn delete(&self, cancel: &CancellationToken, machine: &Machine) -> Result<()> {
        self.observed("delete", self.delete_machine(cancel, machine)).await
    }

    async fn link(&self, cancel: &CancellationToken, machine: &Machine) -> Result<()> {
        self.observed("link", self.link_machine(cancel, machine)).await
    }

    async fn get_instance_types(
        &self,
        cancel: &CancellationToken,
        provisioner: &Provisioner,
    ) -> Result<Vec<InstanceType>> {
        self.observed("get_instance_types", self.instance_types_for(cancel, provisioner))
            .await
    }

    async fn is_machine_drifted(&self, cancel: &CancellationToken, machine: &Machine) -> Result<bool> {
        self.observed("is_drifted", self.drifted(cancel, machine)).await
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn liveness_probe(&self, request: &Request<Body>) -> Result<()> {
        debug!(path = %request.uri().path(), "Liveness probe");
        self.catalog.liveness_probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        MachineSpec, MachineStatus, MachineTemplateRef, NodeTemplateSpec, ProviderRef,
        ProvisionerSpec, ResourceRequirements,
    };
    use crate::domain::ports::{InstanceProvider, ObjectStore};
    use crate::domain::{AmiFamily, InstanceLifecycle, InstanceState};
    use crate::labels;
    use crate::metrics::{OUTCOME_INSUFFICIENT_CAPACITY, OUTCOME_SUCCESS};
    use crate::providers::{
        CatalogEntry, ImageEntry, InMemoryInstanceProvider, InMemoryObjectStore, StaticAmiProvider,
        StaticCatalog,
    };
    use crate::scheduling::{NodeSelectorRequirement, Operator};
    use crate::settings::NodeNameConvention;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Instance provider that records launch requests before delegating
    struct CountingInstances {
        inner: Arc<InMemoryInstanceProvider>,
        creates: AtomicUsize,
        candidates: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl InstanceProvider for CountingInstances {
        async fn create(
            &self,
            cancel: &CancellationToken,
            template: &NodeTemplate,
            machine: &Machine,
            instance_types: &[InstanceType],
        ) -> Result<Instance> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.candidates
                .lock()
                .push(instance_types.iter().map(|it| it.name.clone()).collect());
            self.inner.create(cancel, template, machine, instance_types).await
        }

        async fn get(&self, cancel: &CancellationToken, id: &str) -> Result<Instance> {
            self.inner.get(cancel, id).await
        }

        async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Instance>> {
            self.inner.list(cancel).await
        }

        async fn delete(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
            self.inner.delete(cancel, id).await
        }

        async fn link(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
            self.inner.link(cancel, id).await
        }
    }

    struct Fixture {
        provider: AwsCloudProvider,
        store: Arc<InMemoryObjectStore>,
        instances: Arc<CountingInstances>,
        metrics: Arc<ProviderMetrics>,
    }

    fn entry(name: &str, cpu: &str, memory: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.into(),
            requirements: BTreeMap::new(),
            offerings: vec![crate::domain::Offering {
                zone: "us-east-1a".into(),
                capacity_type: labels::CAPACITY_TYPE_ON_DEMAND.into(),
                price: 0.1,
                available: true,
            }],
            capacity: BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.into())),
                ("memory".to_string(), Quantity(memory.into())),
                ("pods".to_string(), Quantity("0".into())),
            ]),
        }
    }

    fn image(family: AmiFamily, id: &str) -> ImageEntry {
        ImageEntry {
            family,
            architecture: "amd64".into(),
            id: id.into(),
            name: id.into(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(vec![entry("small", "1", "2Gi"), entry("large", "4", "16Gi")])
    }

    fn fixture_with(entries: Vec<CatalogEntry>) -> Fixture {
        let settings = Arc::new(Settings {
            cluster_name: "test".into(),
            node_name_convention: NodeNameConvention::ResourceName,
            ..Default::default()
        });

        let store = Arc::new(InMemoryObjectStore::new());
        store.insert_provisioner(Provisioner::new(
            "default",
            ProvisionerSpec {
                provider_ref: Some(ProviderRef {
                    name: "default".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        store.insert_node_template(NodeTemplate::new("default", NodeTemplateSpec::default()));

        let catalog = Arc::new(StaticCatalog::new(entries).unwrap());
        let amis = Arc::new(StaticAmiProvider::new(vec![
            image(AmiFamily::AL2, "ami-1"),
            image(AmiFamily::Bottlerocket, "ami-br"),
        ]));
        let instances = Arc::new(CountingInstances {
            inner: Arc::new(InMemoryInstanceProvider::new(settings.clone(), amis.clone())),
            creates: AtomicUsize::new(0),
            candidates: Mutex::new(Vec::new()),
        });
        let metrics = Arc::new(ProviderMetrics::new().unwrap());

        let provider = AwsCloudProvider::new(
            settings,
            Collaborators {
                store: store.clone(),
                catalog,
                instances: instances.clone(),
                amis,
            },
        )
        .with_metrics(metrics.clone());

        Fixture {
            provider,
            store,
            instances,
            metrics,
        }
    }

    fn machine(requests: &[(&str, &str)], requirements: Vec<NodeSelectorRequirement>) -> Machine {
        let mut machine = Machine::new(
            "default-abc",
            MachineSpec {
                requirements,
                resources: ResourceRequirements {
                    requests: requests
                        .iter()
                        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                        .collect(),
                },
                machine_template_ref: Some(MachineTemplateRef {
                    name: "default".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        machine.metadata.labels = Some(BTreeMap::from([(
            labels::PROVISIONER_NAME_LABEL_KEY.to_string(),
            "default".to_string(),
        )]));
        machine
    }

    fn orphan(id: &str, provisioner: Option<&str>) -> Instance {
        let mut tags = BTreeMap::from([(labels::CLUSTER_NAME_TAG_KEY.to_string(), "test".to_string())]);
        if let Some(provisioner) = provisioner {
            tags.insert(labels::PROVISIONER_NAME_LABEL_KEY.to_string(), provisioner.to_string());
        }
        Instance {
            instance_id: id.into(),
            image_id: "ami-1".into(),
            availability_zone: "us-east-1a".into(),
            instance_type: "large".into(),
            private_dns_name: "ip-10-0-0-9.ec2.internal".into(),
            tags,
            launch_time: Utc::now(),
            instance_lifecycle: Some(InstanceLifecycle::Spot),
            state: InstanceState::Running,
        }
    }

    #[tokio::test]
    async fn test_cloud_provider_contract() {
        let fixture = fixture();
        let provider: &dyn CloudProvider = &fixture.provider;
        let cancel = CancellationToken::new();

        assert_eq!(provider.name(), "aws");
        let request = Request::get("/healthz").body(Body::empty()).unwrap();
        provider.liveness_probe(&request).unwrap();

        let provisioner = fixture.store.get_provisioner(&cancel, "default").await.unwrap();
        let types = provider.get_instance_types(&cancel, &provisioner).await.unwrap();
        assert_eq!(
            types.iter().map(|it| it.name.as_str()).collect::<Vec<_>>(),
            vec!["small", "large"]
        );

        let created = provider
            .create(&cancel, &machine(&[("cpu", "2")], Vec::new()))
            .await
            .unwrap();
        let id = parse_instance_id(created.provider_id()).unwrap();
        assert_eq!(created.name_or_empty(), id);
        assert_eq!(created.label(labels::LABEL_INSTANCE_TYPE_STABLE), Some("large"));
        assert_eq!(created.label(labels::PROVISIONER_NAME_LABEL_KEY), Some("default"));
        assert_eq!(created.label(labels::LABEL_INSTANCE_AMI_ID), Some("ami-1"));

        let fetched = provider.get(&cancel, created.provider_id()).await.unwrap();
        assert_eq!(fetched, created);

        let listed = provider.list(&cancel).await.unwrap();
        assert_eq!(listed, vec![created.clone()]);

        provider.link(&cancel, &created).await.unwrap();
        let linked = provider.get(&cancel, created.provider_id()).await.unwrap();
        assert_eq!(linked.label(labels::MANAGED_BY_LABEL_KEY), Some("test"));

        assert!(!provider.is_machine_drifted(&cancel, &created).await.unwrap());

        provider.delete(&cancel, &created).await.unwrap();
        assert_matches!(
            provider.get(&cancel, created.provider_id()).await,
            Err(Error::NotFound { .. })
        );
        assert!(provider.delete(&cancel, &created).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_filters_catalog() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        let created = fixture
            .provider
            .create(&cancel, &machine(&[("cpu", "2")], Vec::new()))
            .await
            .unwrap();

        let status = created.status.unwrap();
        assert_eq!(status.capacity["cpu"], Quantity("4".into()));
        assert!(!status.capacity.contains_key("pods"));
        assert!(!status.allocatable.contains_key("pods"));
        assert_eq!(fixture.metrics.count("create", OUTCOME_SUCCESS), 1);
    }

    #[tokio::test]
    async fn test_create_forwards_at_most_sixty_candidates() {
        let entries: Vec<_> = (0..65).map(|i| entry(&format!("m5.type-{:02}", i), "4", "16Gi")).collect();
        let fixture = fixture_with(entries);
        let cancel = CancellationToken::new();

        fixture
            .provider
            .create(&cancel, &machine(&[("cpu", "1")], Vec::new()))
            .await
            .unwrap();

        let candidates = fixture.instances.candidates.lock();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].len(), 60);
        let expected: Vec<_> = (0..60).map(|i| format!("m5.type-{:02}", i)).collect();
        assert_eq!(candidates[0], expected);
    }

    #[tokio::test]
    async fn test_create_without_eligible_types_skips_launch() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        let unsatisfiable = machine(
            &[],
            vec![NodeSelectorRequirement::new(
                labels::LABEL_TOPOLOGY_ZONE,
                Operator::In,
                &["eu-west-1a"],
            )],
        );

        let err = fixture.provider.create(&cancel, &unsatisfiable).await.unwrap_err();
        assert_matches!(err, Error::InsufficientCapacity(_));
        assert_eq!(fixture.instances.creates.load(Ordering::SeqCst), 0);

        let too_big = machine(&[("cpu", "64")], Vec::new());
        assert!(fixture
            .provider
            .create(&cancel, &too_big)
            .await
            .unwrap_err()
            .is_insufficient_capacity());
        assert_eq!(fixture.instances.creates.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.metrics.count("create", OUTCOME_INSUFFICIENT_CAPACITY), 2);
    }

    #[tokio::test]
    async fn test_create_normalizes_label_aliases() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        let aliased = machine(
            &[],
            vec![NodeSelectorRequirement::new(
                labels::LABEL_EBS_CSI_ZONE,
                Operator::In,
                &["us-east-1a"],
            )],
        );
        let created = fixture.provider.create(&cancel, &aliased).await.unwrap();
        assert_eq!(created.label(labels::LABEL_TOPOLOGY_ZONE), Some("us-east-1a"));
    }

    #[tokio::test]
    async fn test_create_stage_errors() {
        let fixture = fixture();
        let cancel = CancellationToken::new();

        let mut missing_template = machine(&[], Vec::new());
        missing_template.spec.machine_template_ref = Some(MachineTemplateRef {
            name: "missing".into(),
            ..Default::default()
        });
        assert_matches!(
            fixture.provider.create(&cancel, &missing_template).await,
            Err(Error::NotFound { .. })
        );

        let mut inline = machine(&[], Vec::new());
        inline.spec.machine_template_ref = None;
        inline.metadata.annotations = Some(BTreeMap::from([(
            labels::PROVIDER_COMPATIBILITY_ANNOTATION_KEY.to_string(),
            "{broken".to_string(),
        )]));
        let err = fixture.provider.create(&cancel, &inline).await.unwrap_err();
        assert!(err.to_string().starts_with("resolving node template, deserializing provider"));
        assert_matches!(err.root(), Error::Deserialization(_));

        fixture.store.remove_provisioner("default");
        assert_matches!(
            fixture.provider.create(&cancel, &machine(&[], Vec::new())).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_get_rejects_malformed_provider_id() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        assert_matches!(
            fixture.provider.get(&cancel, "not-a-provider-id").await,
            Err(Error::NotFound { .. })
        );
        assert_matches!(
            fixture.provider.get(&cancel, "aws:///us-east-1a/i-missing").await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_get_without_owner_omits_instance_type() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        fixture.instances.inner.insert(orphan("i-untagged", None));

        let machine = fixture
            .provider
            .get(&cancel, "aws:///us-east-1a/i-untagged")
            .await
            .unwrap();
        assert_eq!(machine.label(labels::LABEL_INSTANCE_TYPE_STABLE), None);
        assert_eq!(machine.label(labels::LABEL_CAPACITY_TYPE), Some("spot"));
        assert!(machine.status.unwrap().capacity.is_empty());
    }

    #[tokio::test]
    async fn test_list_degrades_unresolved_instances() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        fixture.instances.inner.insert(orphan("i-owned", Some("default")));
        fixture.instances.inner.insert(orphan("i-deleted-owner", Some("gone")));

        let machines = fixture.provider.list(&cancel).await.unwrap();
        assert_eq!(machines.len(), 2);

        let by_name: BTreeMap<&str, &Machine> =
            machines.iter().map(|m| (m.name_or_empty(), m)).collect();
        assert_eq!(
            by_name["i-owned"].label(labels::LABEL_INSTANCE_TYPE_STABLE),
            Some("large")
        );
        let degraded = by_name["i-deleted-owner"];
        assert_eq!(degraded.label(labels::LABEL_INSTANCE_TYPE_STABLE), None);
        assert_eq!(degraded.label(labels::PROVISIONER_NAME_LABEL_KEY), Some("gone"));
        assert_eq!(degraded.provider_id(), "aws:///us-east-1a/i-deleted-owner");
    }

    #[tokio::test]
    async fn test_list_tolerates_resolution_failures() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        fixture.store.insert_provisioner(Provisioner::new("inline", ProvisionerSpec {
            provider: Some(serde_json::json!("not an object")),
            ..Default::default()
        }));
        fixture.instances.inner.insert(orphan("i-bad-provider", Some("inline")));

        let machines = fixture.provider.list(&cancel).await.unwrap();
        assert_eq!(machines.len(), 1);
        assert!(machines[0].status.as_ref().unwrap().capacity.is_empty());

        // The same failure is fatal for a single-target lookup
        let err = fixture
            .provider
            .get(&cancel, "aws:///us-east-1a/i-bad-provider")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("resolving instance type"));
    }

    #[tokio::test]
    async fn test_drift_follows_template_family() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        let created = fixture
            .provider
            .create(&cancel, &machine(&[], Vec::new()))
            .await
            .unwrap();
        assert!(!fixture.provider.is_machine_drifted(&cancel, &created).await.unwrap());

        let mut bottlerocket = NodeTemplate::new("default", NodeTemplateSpec::default());
        bottlerocket.spec.aws.ami_family = Some("Bottlerocket".into());
        fixture.store.insert_node_template(bottlerocket);
        assert!(fixture.provider.is_machine_drifted(&cancel, &created).await.unwrap());

        let mut pinned = NodeTemplate::new("default", NodeTemplateSpec::default());
        pinned.spec.aws.ami_family = Some("Bottlerocket".into());
        pinned.spec.aws.launch_template_name = Some("custom-lt".into());
        fixture.store.insert_node_template(pinned);
        assert!(!fixture.provider.is_machine_drifted(&cancel, &created).await.unwrap());
    }

    #[tokio::test]
    async fn test_drift_without_owner_or_template() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        let created = fixture
            .provider
            .create(&cancel, &machine(&[], Vec::new()))
            .await
            .unwrap();

        let mut unowned = created.clone();
        unowned.metadata.labels = None;
        assert!(!fixture.provider.is_machine_drifted(&cancel, &unowned).await.unwrap());

        fixture.store.remove_node_template("default");
        assert!(!fixture.provider.is_machine_drifted(&cancel, &created).await.unwrap());

        fixture.store.remove_provisioner("default");
        assert!(!fixture.provider.is_machine_drifted(&cancel, &created).await.unwrap());
    }

    #[tokio::test]
    async fn test_drift_with_unknown_instance_type_fails() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        let mut created = fixture
            .provider
            .create(&cancel, &machine(&[], Vec::new()))
            .await
            .unwrap();
        created
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(labels::LABEL_INSTANCE_TYPE_STABLE.into(), "retired".into());

        let err = fixture
            .provider
            .is_machine_drifted(&cancel, &created)
            .await
            .unwrap_err();
        assert_matches!(err.root(), Error::Resolution(_));
    }

    #[tokio::test]
    async fn test_cancelled_calls_return_promptly() {
        let fixture = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fixture
            .provider
            .create(&cancel, &machine(&[], Vec::new()))
            .await
            .unwrap_err();
        assert_matches!(err.root(), Error::Cancelled);
        assert_eq!(fixture.instances.creates.load(Ordering::SeqCst), 0);
        assert_matches!(fixture.provider.list(&cancel).await.unwrap_err().root(), Error::Cancelled);

        let machine = Machine {
            status: Some(MachineStatus {
                provider_id: "aws:///us-east-1a/i-1".into(),
                ..Default::default()
            }),
            ..machine(&[], Vec::new())
        };
        assert_matches!(
            fixture.provider.delete(&cancel, &machine).await.unwrap_err().root(),
            Error::Cancelled
        );
    }
}
