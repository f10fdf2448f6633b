//! Provider Identity
//!
//! `<scheme>:///<availability-zone>/<instance-id>` strings identifying the
//! cloud instance behind a Machine.

use crate::error::{Error, Result};

/// Format the provider identity for an instance
pub fn format_provider_id(scheme: &str, zone: &str, instance_id: &str) -> String {
    format!("{}:///{}/{}", scheme, zone, instance_id)
}

/// Parse the instance id out of a provider identity.
///
/// Fails with NotFound when the string carries no instance id, so callers
/// treating absent instances as already gone behave the same way.
pub fn parse_instance_id(provider_id: &str) -> Result<String> {
    let not_found = || Error::not_found("Instance", provider_id);

    let (_, path) = provider_id.split_once(":///").ok_or_else(not_found)?;
    let (zone, instance_id) = path.rsplit_once('/').ok_or_else(not_found)?;
    if zone.is_empty() || instance_id.is_empty() {
        return Err(not_found());
    }
    Ok(instance_id.to_string())
}
