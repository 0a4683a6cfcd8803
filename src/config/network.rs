//! Service network defaulting.
//!
//! # Responsibilities
//! - Parse the service cluster IP range and the node port range
//! - Pick the API server's own service IP from the range
//! - Fill every unset cluster value exactly once, before assembly

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use ipnet::IpNet;
use thiserror::Error;

use crate::config::schema::{ClusterConfig, EndpointPort, ServicePort};

/// Range used when none is configured.
pub const DEFAULT_SERVICE_CLUSTER_IP_RANGE: &str = "10.0.0.0/24";

/// Smallest usable service range.
pub const MIN_SERVICE_RANGE_SIZE: u128 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("invalid CIDR {0:?}: {1}")]
    InvalidCidr(String, String),

    #[error("the service cluster IP range must be at least {MIN_SERVICE_RANGE_SIZE} IP addresses, {0} has {1}")]
    RangeTooSmall(IpNet, u128),

    #[error("index {index} is out of range for {net}")]
    IndexOutOfRange { net: IpNet, index: u128 },

    #[error("service read-write IP {ip} is not inside {net}")]
    IpOutsideRange { ip: IpAddr, net: IpNet },

    #[error("invalid port range {0:?}: expected \"<low>-<high>\"")]
    InvalidPortRange(String),
}

/// An inclusive range of ports, stored as base and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub base: u16,
    pub size: u16,
}

impl PortRange {
    pub const DEFAULT: PortRange = PortRange { base: 30000, size: 2768 };

    pub fn contains(&self, port: u16) -> bool {
        port >= self.base && u32::from(port) < u32::from(self.base) + u32::from(self.size)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let high = u32::from(self.base) + u32::from(self.size) - 1;
        write!(f, "{}-{}", self.base, high)
    }
}

impl FromStr for PortRange {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetworkError::InvalidPortRange(s.to_string());
        let (low, high) = s.trim().split_once('-').ok_or_else(invalid)?;
        let low: u16 = low.trim().parse().map_err(|_| invalid())?;
        let high: u16 = high.trim().parse().map_err(|_| invalid())?;
        if high < low {
            return Err(invalid());
        }
        // A full 0-65535 range does not fit in a u16 size.
        let size = u16::try_from(u32::from(high) - u32::from(low) + 1).map_err(|_| invalid())?;
        Ok(PortRange { base: low, size })
    }
}

pub fn parse_cidr(s: &str) -> Result<IpNet, NetworkError> {
    s.trim()
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|e| NetworkError::InvalidCidr(s.to_string(), e.to_string()))
}

/// Number of addresses in the network, saturating for very large IPv6 ranges.
pub fn range_size(net: &IpNet) -> u128 {
    let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// The address `index` positions after the network address.
pub fn indexed_ip(net: &IpNet, index: u128) -> Result<IpAddr, NetworkError> {
    let out_of_range = || NetworkError::IndexOutOfRange { net: *net, index };
    if index >= range_size(net) {
        return Err(out_of_range());
    }
    let ip = match net.network() {
        IpAddr::V4(base) => {
            let offset = u32::try_from(index).map_err(|_| out_of_range())?;
            IpAddr::V4(Ipv4Addr::from(u32::from(base) + offset))
        }
        IpAddr::V6(base) => IpAddr::V6(Ipv6Addr::from(u128::from(base) + index)),
    };
    Ok(ip)
}

/// Cluster values after defaulting. Immutable from here on.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub service_cluster_ip_range: IpNet,
    pub service_read_write_ip: IpAddr,
    pub service_read_write_port: u16,
    pub service_node_port_range: PortRange,
    pub master_count: u32,
    pub public_read_write_port: u16,
    pub cluster_ip: Option<IpAddr>,
    pub external_host: Option<String>,
    pub cache_timeout: Duration,
    pub master_service_namespace: String,
    pub extra_service_ports: Vec<ServicePort>,
    pub extra_endpoint_ports: Vec<EndpointPort>,
    pub kubernetes_service_node_port: u16,
}

impl ClusterConfig {
    /// Fill in every unset value. Fails on values that can never be served.
    pub fn complete(&self) -> Result<ClusterInfo, NetworkError> {
        let range = match &self.service_cluster_ip_range {
            Some(cidr) => parse_cidr(cidr)?,
            None => {
                tracing::warn!(
                    default = DEFAULT_SERVICE_CLUSTER_IP_RANGE,
                    "Network range for service cluster IPs is unspecified, using default"
                );
                parse_cidr(DEFAULT_SERVICE_CLUSTER_IP_RANGE)?
            }
        };
        let size = range_size(&range);
        if size < MIN_SERVICE_RANGE_SIZE {
            return Err(NetworkError::RangeTooSmall(range, size));
        }

        let read_write_ip = match self.service_read_write_ip {
            Some(ip) if range.contains(&ip) => ip,
            Some(ip) => return Err(NetworkError::IpOutsideRange { ip, net: range }),
            None => {
                // First usable address of the range.
                let ip = indexed_ip(&range, 1)?;
                tracing::debug!(ip = %ip, "Setting API server service IP (read-write)");
                ip
            }
        };

        let node_ports = match &self.service_node_port_range {
            Some(s) => s.parse()?,
            None => {
                tracing::info!(range = %PortRange::DEFAULT, "Node port range unspecified, using default");
                PortRange::DEFAULT
            }
        };

        Ok(ClusterInfo {
            service_cluster_ip_range: range,
            service_read_write_ip: read_write_ip,
            service_read_write_port: 443,
            service_node_port_range: node_ports,
            master_count: self.master_count.max(1),
            public_read_write_port: if self.read_write_port == 0 { 6443 } else { self.read_write_port },
            cluster_ip: self.public_address,
            external_host: self.external_host.clone(),
            cache_timeout: Duration::from_secs(if self.cache_timeout_secs == 0 { 5 } else { self.cache_timeout_secs }),
            master_service_namespace: self.master_service_namespace.clone(),
            extra_service_ports: self.extra_service_ports.clone(),
            extra_endpoint_ports: self.extra_endpoint_ports.clone(),
            kubernetes_service_node_port: self.kubernetes_service_node_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_round_trips_display() {
        let range: PortRange = "30000-32767".parse().unwrap();
        assert_eq!(range, PortRange::DEFAULT);
        assert_eq!(range.to_string(), "30000-32767");
        assert!(range.contains(30000));
        assert!(range.contains(32767));
        assert!(!range.contains(32768));
    }

    #[test]
    fn port_range_rejects_garbage() {
        assert!("32767-30000".parse::<PortRange>().is_err());
        assert!("30000".parse::<PortRange>().is_err());
        assert!("a-b".parse::<PortRange>().is_err());
    }

    #[test]
    fn indexed_ip_counts_from_network_address() {
        let net = parse_cidr("10.0.0.0/24").unwrap();
        assert_eq!(indexed_ip(&net, 1).unwrap(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(indexed_ip(&net, 255).unwrap(), "10.0.0.255".parse::<IpAddr>().unwrap());
        assert!(indexed_ip(&net, 256).is_err());

        let v6 = parse_cidr("fd00::/120").unwrap();
        assert_eq!(indexed_ip(&v6, 1).unwrap(), "fd00::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn complete_fills_defaults_once() {
        let info = ClusterConfig::default().complete().unwrap();
        assert_eq!(info.service_cluster_ip_range.to_string(), "10.0.0.0/24");
        assert_eq!(info.service_read_write_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(info.service_node_port_range, PortRange::DEFAULT);
        assert_eq!(info.master_count, 1);
        assert_eq!(info.public_read_write_port, 6443);
        assert_eq!(info.service_read_write_port, 443);
        assert_eq!(info.cache_timeout, Duration::from_secs(5));
    }

    #[test]
    fn complete_rejects_tiny_range() {
        let config = ClusterConfig {
            service_cluster_ip_range: Some("10.0.0.0/30".into()),
            ..Default::default()
        };
        assert!(matches!(config.complete(), Err(NetworkError::RangeTooSmall(_, 4))));
    }

    #[test]
    fn complete_rejects_ip_outside_range() {
        let config = ClusterConfig {
            service_cluster_ip_range: Some("10.0.0.0/24".into()),
            service_read_write_ip: Some("10.1.0.1".parse().unwrap()),
            ..Default::default()
        };
        assert!(matches!(config.complete(), Err(NetworkError::IpOutsideRange { .. })));
    }
}
