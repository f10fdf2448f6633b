//! Object Stores
//!
//! Read access to Provisioners and node templates, backed by the Kubernetes
//! API server or by an in-process map.

use crate::crd::{NodeTemplate, Provisioner};
use crate::domain::ports::ObjectStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::{Api, Client};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// =============================================================================
// Kubernetes Object Store
// =============================================================================

/// Object store reading cluster-scoped resources from the API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get_provisioner(&self, _cancel: &CancellationToken, name: &str) -> Result<Provisioner> {
        let api: Api<Provisioner> = Api::all(self.client.clone());
        debug!(provisioner = %name, "Fetching provisioner");
        api.get(name)
            .await
            .map_err(|err| map_kube_error(err, "Provisioner", name))
    }

    async fn get_node_template(&self, _cancel: &CancellationToken, name: &str) -> Result<NodeTemplate> {
        let api: Api<NodeTemplate> = Api::all(self.client.clone());
        debug!(template = %name, "Fetching node template");
        api.get(name)
            .await
            .map_err(|err| map_kube_error(err, "AWSNodeTemplate", name))
    }
}

fn map_kube_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => Error::not_found(kind, name),
        other => Error::Kube(other),
    }
}

// =============================================================================
// In-Memory Object Store
// =============================================================================

/// Object store over in-process maps, for standalone runs and tests
#[derive(Default)]
pub struct InMemoryObjectStore {
    provisioners: RwLock<BTreeMap<String, Provisioner>>,
    templates: RwLock<BTreeMap<String, NodeTemplate>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a provisioner under its metadata name, replacing any previous one
    pub fn insert_provisioner(&self, provisioner: Provisioner) {
        let name = provisioner.metadata.name.clone().unwrap_or_default();
        self.provisioners.write().insert(name, provisioner);
    }

    /// Store a node template under its metadata name, replacing any previous one
    pub fn insert_node_template(&self, template: NodeTemplate) {
        let name = template.metadata.name.clone().unwrap_or_default();
        self.templates.write().insert(name, template);
    }

    pub fn remove_provisioner(&self, name: &str) -> Option<Provisioner> {
        self.provisioners.write().remove(name)
    }

    pub fn remove_node_template(&self, name: &str) -> Option<NodeTemplate> {
        self.templates.write().remove(name)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_provisioner(&self, _cancel: &CancellationToken, name: &str) -> Result<Provisioner> {
        self.provisioners
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Provisioner", name))
    }

    async fn get_node_template(&self, _cancel: &CancellationToken, name: &str) -> Result<NodeTemplate> {
        self.templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("AWSNodeTemplate", name))
    }
}
