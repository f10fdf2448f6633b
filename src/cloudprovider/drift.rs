//! AMI Drift Detection
//!
//! A machine has drifted when its instance runs an image outside the set its
//! node template currently resolves to. Templates naming an explicit launch
//! template own image selection themselves and never drift here.

use super::provider_id::parse_instance_id;
use crate::crd::{Machine, NodeTemplate};
use crate::domain::ports::{cancellable, AmiProvider, InstanceProvider};
use crate::domain::{AmiFamily, InstanceType};
use crate::error::{Error, Result, StageExt};
use crate::labels;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Compare the machine's running image with the images implied by `template`.
///
/// `instance_types` is a fresh catalog listing for the machine's provisioner.
pub async fn is_ami_drifted(
    amis: &dyn AmiProvider,
    instances: &dyn InstanceProvider,
    cancel: &CancellationToken,
    machine: &Machine,
    instance_types: Vec<InstanceType>,
    template: &NodeTemplate,
) -> Result<bool> {
    let declared = machine.label(labels::LABEL_INSTANCE_TYPE_STABLE).unwrap_or_default();
    let instance_type = instance_types
        .into_iter()
        .find(|it| it.name == declared)
        .ok_or_else(|| Error::Resolution(format!("finding node instance type \"{}\"", declared)))?;

    if template.launch_template_name().is_some() {
        return Ok(false);
    }

    let family = AmiFamily::from_name(template.spec.aws.ami_family.as_deref());
    let images = cancellable(
        cancel,
        amis.get(cancel, template, std::slice::from_ref(&instance_type), family),
    )
    .await
    .stage("getting amis")?;

    let instance_id = parse_instance_id(machine.provider_id())?;
    let instance = cancellable(cancel, instances.get(cancel, &instance_id))
        .await
        .stage("getting instance")?;

    let drifted = !images.contains_key(&instance.image_id);
    debug!(
        machine = %machine.name_or_empty(),
        id = %instance_id,
        image = %instance.image_id,
        family = %family,
        drifted,
        "Checked AMI drift"
    );
    Ok(drifted)
}
