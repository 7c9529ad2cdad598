//! Hostname resolution with an address-family preference.

use std::net::SocketAddr;

use tokio::net::lookup_host;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::IpVersion;

/// Resolve `host:port` to the first endpoint matching the requested
/// address family.
pub async fn resolve(host: &str, port: u16, ip_version: IpVersion) -> FtpResult<SocketAddr> {
    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| FtpError::connection_failed(format!("resolve {}: {}", host, e)))?;

    addrs
        .into_iter()
        .find(|addr| match ip_version {
            IpVersion::Any => true,
            IpVersion::V4Only => addr.is_ipv4(),
            IpVersion::V6Only => addr.is_ipv6(),
        })
        .ok_or_else(|| {
            FtpError::no_endpoint(format!(
                "{} has no address for {:?}",
                host, ip_version
            ))
        })
}
