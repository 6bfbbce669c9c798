// Local network inventory - host interfaces and their IPv4 subnets, captured once

use async_trait::async_trait;
use serde::Serialize;
use std::net::Ipv4Addr;

use super::LocalNetwork;
use super::lookup::select_interface;
use crate::error::{RouteError, RouteResult};

/// Something that can enumerate the host's interfaces.
///
/// Interfaces are returned in kernel order; an interface without IPv4
/// addresses is reported with an empty subnet list.
#[async_trait]
pub trait InterfaceSource: Send + Sync {
    async fn interfaces(&self) -> RouteResult<Vec<LocalNetwork>>;
}

/// Ordered, immutable snapshot of the local networks used to pick egress
/// interfaces for gateways.
#[derive(Debug, Clone, Serialize)]
pub struct LocalNetworkInventory {
    networks: Vec<LocalNetwork>,
}

impl LocalNetworkInventory {
    /// Enumerate host interfaces once. Fails with `NoLocalNetwork` when no
    /// interface carries an IPv4 address.
    pub async fn discover(source: &dyn InterfaceSource) -> RouteResult<Self> {
        let interfaces = source.interfaces().await?;
        let inventory = Self::from_interfaces(interfaces)?;

        for network in inventory.networks() {
            let subnets: Vec<String> = network
                .subnets
                .iter()
                .map(|ip4| format!("{} ({})", ip4.network, ip4.ip))
                .collect();
            tracing::info!(
                "Local network [{}] index {}: {}",
                network.interface_name,
                network.interface_index,
                subnets.join(", ")
            );
        }

        Ok(inventory)
    }

    /// Build the inventory from an interface listing, dropping interfaces
    /// without IPv4 addresses.
    pub fn from_interfaces(interfaces: Vec<LocalNetwork>) -> RouteResult<Self> {
        let networks: Vec<LocalNetwork> = interfaces
            .into_iter()
            .filter(|network| {
                if network.subnets.is_empty() {
                    tracing::warn!("[{}] can not find ipv4 address", network.interface_name);
                    false
                } else {
                    true
                }
            })
            .collect();

        if networks.is_empty() {
            return Err(RouteError::NoLocalNetwork);
        }

        Ok(LocalNetworkInventory { networks })
    }

    pub fn networks(&self) -> &[LocalNetwork] {
        &self.networks
    }

    /// The interface traffic to `gateway` leaves through, if any
    pub fn select(&self, gateway: Ipv4Addr) -> Option<&LocalNetwork> {
        select_interface(&self.networks, gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::Ip4;

    struct StaticInterfaces(Vec<LocalNetwork>);

    #[async_trait]
    impl InterfaceSource for StaticInterfaces {
        async fn interfaces(&self) -> RouteResult<Vec<LocalNetwork>> {
            Ok(self.0.clone())
        }
    }

    fn iface(name: &str, index: u32, addrs: &[&str]) -> LocalNetwork {
        LocalNetwork {
            interface_name: name.to_string(),
            interface_index: index,
            subnets: addrs
                .iter()
                .map(|a| {
                    let (ip, len) = a.split_once('/').unwrap();
                    Ip4::new(ip.parse().unwrap(), len.parse().unwrap()).unwrap()
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_discover_skips_interfaces_without_ipv4() {
        let source = StaticInterfaces(vec![
            iface("lo", 1, &["127.0.0.1/8"]),
            iface("dummy0", 2, &[]),
            iface("eth0", 3, &["10.0.0.5/24"]),
        ]);

        let inventory = LocalNetworkInventory::discover(&source).await.unwrap();
        let names: Vec<&str> = inventory
            .networks()
            .iter()
            .map(|n| n.interface_name.as_str())
            .collect();
        assert_eq!(names, vec!["lo", "eth0"]);
    }

    #[tokio::test]
    async fn test_discover_fails_without_any_ipv4() {
        let source = StaticInterfaces(vec![iface("dummy0", 2, &[])]);
        let err = LocalNetworkInventory::discover(&source).await.unwrap_err();
        assert_eq!(err, RouteError::NoLocalNetwork);

        let err = LocalNetworkInventory::from_interfaces(vec![]).unwrap_err();
        assert_eq!(err, RouteError::NoLocalNetwork);
    }

    #[test]
    fn test_select_respects_discovery_order() {
        let inventory = LocalNetworkInventory::from_interfaces(vec![
            iface("eth1", 4, &["10.0.0.0/8"]),
            iface("eth0", 3, &["10.0.0.5/24"]),
        ])
        .unwrap();

        let selected = inventory.select("10.0.0.9".parse().unwrap()).unwrap();
        assert_eq!(selected.interface_name, "eth1");
        assert!(inventory.select("192.168.1.1".parse().unwrap()).is_none());
    }
}
