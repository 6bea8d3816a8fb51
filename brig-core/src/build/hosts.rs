use crate::error::{BrigError, Result};
use std::net::IpAddr;

/// Encode `host:ip` entries as the frontend's `add-hosts` attribute
/// (`host=ip`, comma separated).
pub(crate) fn to_buildkit_extra_hosts(hosts: &[String]) -> Result<String> {
    let mut encoded = Vec::with_capacity(hosts.len());
    for entry in hosts {
        let (host, ip) = entry
            .split_once(':')
            .ok_or_else(|| BrigError::InvalidExtraHost { host: entry.clone() })?;
        if host.is_empty() || ip.parse::<IpAddr>().is_err() {
            return Err(BrigError::InvalidExtraHost { host: entry.clone() });
        }
        encoded.push(format!("{}={}", host, ip));
    }
    Ok(encoded.join(","))
}
