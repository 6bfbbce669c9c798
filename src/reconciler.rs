// Route reconciler - converges the kernel table towards desired routes
//
// Every entry point takes the same lock for its whole read-then-write
// sequence. The kernel has no transactional route API, so two operations
// must never interleave their reads and writes.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::RouteResult;
use crate::routes::inventory::LocalNetworkInventory;
use crate::routes::lookup::contains_cidr;
use crate::routes::table::KernelRouteTable;
use crate::routes::{KernelRoute, Route, parse_cidr};

pub struct RouteReconciler {
    inventory: Arc<LocalNetworkInventory>,
    table: Arc<dyn KernelRouteTable>,
    lock: Mutex<()>,
}

impl RouteReconciler {
    pub fn new(inventory: Arc<LocalNetworkInventory>, table: Arc<dyn KernelRouteTable>) -> Self {
        RouteReconciler {
            inventory,
            table,
            lock: Mutex::new(()),
        }
    }

    pub fn inventory(&self) -> &LocalNetworkInventory {
        &self.inventory
    }

    /// Make sure `cidr` routes via `gateway`.
    ///
    /// No-op when the route is already in place; a route for the same
    /// destination through another gateway or interface is replaced.
    pub async fn ensure(&self, cidr: &str, gateway: Ipv4Addr) -> RouteResult<()> {
        let destination = parse_cidr(cidr)?;
        let desired = Route::new(destination, gateway);

        let _guard = self.lock.lock().await;

        if self.table.exists(&desired, &self.inventory).await? {
            return Ok(());
        }

        if self.table.conflicts(&desired, &self.inventory).await? {
            tracing::info!("route [{}] conflicts, replacing with gateway {}", destination, gateway);
            self.table.delete(destination).await?;
        }

        self.table.add(&desired, &self.inventory).await
    }

    /// Remove whatever route exists for `cidr`, regardless of gateway
    pub async fn remove(&self, cidr: &str) -> RouteResult<()> {
        let destination = parse_cidr(cidr)?;

        let _guard = self.lock.lock().await;
        self.table.delete(destination).await
    }

    /// Delete routes inside the managed pools that no desired destination
    /// covers. Routes outside every pool are left alone.
    pub async fn reconcile_against_pools(&self, pools: &[Ipv4Net], desired: &[Ipv4Net]) -> RouteResult<()> {
        let _guard = self.lock.lock().await;

        let orphans: Vec<KernelRoute> = self
            .table
            .list_managed(pools)
            .await?
            .into_iter()
            .filter(|route| !desired.iter().any(|d| contains_cidr(d, &route.destination)))
            .collect();

        for route in orphans {
            tracing::info!("route [{}] is no longer desired, deleting", route.destination);
            if let Err(e) = self.table.delete(route.destination).await {
                tracing::error!("drift cleanup of [{}] failed: {}", route.destination, e);
            }
        }

        Ok(())
    }

    /// Delete every route inside the managed pools
    pub async fn teardown(&self, pools: &[Ipv4Net]) -> RouteResult<()> {
        let _guard = self.lock.lock().await;

        for pool in pools {
            tracing::info!("clean pod routes within [{}]", pool);
            if let Err(e) = self.table.delete_all_within(*pool).await {
                tracing::error!("clean pod routes within [{}] failed: {}", pool, e);
            }
        }

        Ok(())
    }

    /// Current managed routes, for reporting
    pub async fn managed_routes(&self, pools: &[Ipv4Net]) -> RouteResult<Vec<KernelRoute>> {
        self.table.list_managed(pools).await
    }
}
