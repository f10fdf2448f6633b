//! Static AMI Resolver
//!
//! Images published per (family, architecture), as listed in the catalog file.
//! The Custom family selects images by id through the template's AMI selector.

use crate::crd::NodeTemplate;
use crate::domain::ports::AmiProvider;
use crate::domain::{AmiFamily, AmiMetadata, InstanceType};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// AMI selector key naming comma-separated image ids
pub const AMI_SELECTOR_IDS_KEY: &str = "aws-ids";

/// One published image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub family: AmiFamily,
    pub architecture: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// AMI resolver over a fixed image list
#[derive(Debug, Clone, Default)]
pub struct StaticAmiProvider {
    images: BTreeMap<(AmiFamily, String), Vec<ImageEntry>>,
}

impl StaticAmiProvider {
    pub fn new(entries: Vec<ImageEntry>) -> Self {
        let mut images: BTreeMap<(AmiFamily, String), Vec<ImageEntry>> = BTreeMap::new();
        for entry in entries {
            images
                .entry((entry.family, entry.architecture.clone()))
                .or_default()
                .push(entry);
        }
        Self { images }
    }

    fn custom(template: &NodeTemplate) -> BTreeMap<String, AmiMetadata> {
        template
            .spec
            .ami_selector
            .get(AMI_SELECTOR_IDS_KEY)
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(|id| {
                        (
                            id.to_string(),
                            AmiMetadata {
                                name: id.to_string(),
                                architecture: String::new(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl AmiProvider for StaticAmiProvider {
    async fn get(
        &self,
        _cancel: &CancellationToken,
        template: &NodeTemplate,
        instance_types: &[InstanceType],
        family: AmiFamily,
    ) -> Result<BTreeMap<String, AmiMetadata>> {
        if family == AmiFamily::Custom {
            return Ok(Self::custom(template));
        }

        let mut resolved = BTreeMap::new();
        for instance_type in instance_types {
            let architecture = AmiFamily::architecture_for(&instance_type.requirements);
            if !family.architectures().contains(&architecture.as_str()) {
                continue;
            }
            let key = (family, architecture);
            for image in self.images.get(&key).into_iter().flatten() {
                resolved.insert(
                    image.id.clone(),
                    AmiMetadata {
                        name: image.name.clone(),
                        architecture: image.architecture.clone(),
                    },
                );
            }
        }
        debug!(family = %family, images = resolved.len(), "Resolved AMIs");
        Ok(resolved)
    }
}
