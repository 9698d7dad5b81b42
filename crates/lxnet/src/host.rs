//! Host name and address lookups.

use std::io;
use std::net::{IpAddr, ToSocketAddrs};

use crate::error::NetError;

/// Name of the machine this process runs on.
#[cfg(unix)]
pub fn host_name() -> Result<String, NetError> {
    let name = nix::unistd::gethostname().map_err(io::Error::from)?;
    Ok(name.to_string_lossy().into_owned())
}

/// Name of the machine this process runs on.
#[cfg(not(unix))]
pub fn host_name() -> Result<String, NetError> {
    std::env::var("COMPUTERNAME")
        .map_err(|e| NetError::Io(io::Error::new(io::ErrorKind::NotFound, e)))
}

/// Resolve `name` to an address, preferring IPv4.
pub fn host_ip_by_name(name: &str) -> Result<IpAddr, NetError> {
    if name.is_empty() {
        return Err(NetError::InvalidArgument("empty host name".to_string()));
    }
    let addrs: Vec<IpAddr> = (name, 0).to_socket_addrs()?.map(|a| a.ip()).collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            NetError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address for {name}"),
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_host_name_is_not_empty() {
        assert!(!host_name().unwrap().is_empty());
    }

    #[test]
    fn test_literal_address_resolves_to_itself() {
        assert_eq!(
            host_ip_by_name("127.0.0.1").unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn test_localhost_resolves() {
        assert!(host_ip_by_name("localhost").unwrap().is_loopback());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            host_ip_by_name(""),
            Err(NetError::InvalidArgument(_))
        ));
    }
}
