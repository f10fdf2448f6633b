//! Node Template Resolution
//!
//! Resolves the canonical node template from a stored reference or an inline
//! serialized provider spec. The reference wins when both are present.

use crate::crd::{AwsProvider, NodeTemplate};
use crate::domain::ports::{cancellable, ObjectStore};
use crate::error::{Result, StageExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Resolve a node template from a reference name or raw provider bytes
pub async fn resolve_node_template(
    store: &dyn ObjectStore,
    cancel: &CancellationToken,
    raw: Option<&[u8]>,
    reference: Option<&str>,
) -> Result<NodeTemplate> {
    if let Some(name) = reference {
        debug!(template = %name, "Resolving referenced node template");
        return cancellable(cancel, store.get_node_template(cancel, name))
            .await
            .stage("getting providerRef");
    }
    let aws = AwsProvider::deserialize(raw.unwrap_or_default())?;
    Ok(NodeTemplate::from_provider(aws))
}
