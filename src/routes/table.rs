// Kernel route table - the capability the reconciler mutates
//
// Backends implement four primitives over the IPv4 main table. Everything the
// reconciler needs (exact match, conflict detection, containment queries,
// batch delete) is derived from those, so every backend shares one set of
// semantics.

use async_trait::async_trait;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

use super::inventory::LocalNetworkInventory;
use super::lookup::contains_cidr;
use super::{KernelRoute, Route};
use crate::error::{RouteError, RouteResult};

#[async_trait]
pub trait KernelRouteTable: Send + Sync {
    /// Every IPv4 route in the main table that has an explicit destination
    async fn routes(&self) -> RouteResult<Vec<KernelRoute>>;

    /// Name of the link with the given index
    async fn interface_name(&self, index: u32) -> RouteResult<String>;

    /// Install `destination via gateway dev <index>`
    async fn install(&self, destination: Ipv4Net, gateway: Ipv4Addr, index: u32) -> RouteResult<()>;

    /// Remove one installed route. A route that is already gone is not an error.
    async fn uninstall(&self, route: &KernelRoute) -> RouteResult<()>;

    /// Routes whose destination lies inside at least one pool
    async fn list_managed(&self, pools: &[Ipv4Net]) -> RouteResult<Vec<KernelRoute>> {
        let routes = self.routes().await?;
        Ok(routes
            .into_iter()
            .filter(|r| pools.iter().any(|pool| contains_cidr(pool, &r.destination)))
            .collect())
    }

    /// Whether the desired route is installed exactly: same destination, same
    /// gateway, leaving through the interface the inventory picks.
    async fn exists(&self, desired: &Route, inventory: &LocalNetworkInventory) -> RouteResult<bool> {
        let Some(network) = inventory.select(desired.gateway) else {
            return Ok(false);
        };

        for route in self.routes().await? {
            if route.destination != desired.destination || route.gateway != Some(desired.gateway) {
                continue;
            }
            let Some(index) = route.interface_index else {
                continue;
            };
            match self.interface_name(index).await {
                Ok(name) if name == network.interface_name => {
                    tracing::debug!(
                        "route [{}] already exist, with interface [{}]",
                        desired.destination,
                        name
                    );
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("skipping route [{}]: {}", route.destination, e),
            }
        }

        Ok(false)
    }

    /// Whether a route for the same destination is installed with a different
    /// gateway or egress interface. A missing route is not a conflict.
    async fn conflicts(&self, desired: &Route, inventory: &LocalNetworkInventory) -> RouteResult<bool> {
        let wanted = inventory.select(desired.gateway).map(|n| n.interface_name.as_str());

        for route in self.routes().await? {
            if route.destination != desired.destination {
                continue;
            }
            if route.gateway != Some(desired.gateway) {
                return Ok(true);
            }
            let name = match route.interface_index {
                Some(index) => self.interface_name(index).await.ok(),
                None => None,
            };
            if name.is_none() || name.as_deref() != wanted {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Install the desired route through the interface whose subnet holds the
    /// gateway.
    async fn add(&self, desired: &Route, inventory: &LocalNetworkInventory) -> RouteResult<()> {
        let network = inventory
            .select(desired.gateway)
            .ok_or(RouteError::GatewayUnreachable(desired.gateway))?;

        match self
            .install(desired.destination, desired.gateway, network.interface_index)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "add route: [{}] via {} success, with interface [{}]",
                    desired.destination,
                    desired.gateway,
                    network.interface_name
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("add route: [{}] err: {}", desired.destination, e);
                Err(e)
            }
        }
    }

    /// Remove every route for exactly this destination, whatever its gateway
    async fn delete(&self, destination: Ipv4Net) -> RouteResult<()> {
        for route in self.routes().await? {
            if route.destination != destination {
                continue;
            }
            if let Err(e) = self.uninstall(&route).await {
                tracing::error!("del route: [{}] err: {}", destination, e);
                return Err(e);
            }
            tracing::info!("del route: [{}]", destination);
        }
        Ok(())
    }

    /// Remove every route inside `network`. Per-route failures are logged and
    /// skipped.
    async fn delete_all_within(&self, network: Ipv4Net) -> RouteResult<()> {
        for route in self.routes().await? {
            if !contains_cidr(&network, &route.destination) {
                continue;
            }
            match self.uninstall(&route).await {
                Ok(()) => tracing::info!("del route: [{}]", route.destination),
                Err(e) => tracing::error!("del route: [{}] err: {}", route.destination, e),
            }
        }
        Ok(())
    }
}
