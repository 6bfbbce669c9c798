// In-memory kernel route table for tests
//
// Behaves like the main table for the operations the reconciler uses: one
// route per destination, adds of an occupied destination fail with EEXIST.
// Counts mutations and tracks overlapping calls so tests can check
// idempotence and serialization.

use async_trait::async_trait;
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::inventory::{InterfaceSource, LocalNetworkInventory};
use super::table::KernelRouteTable;
use super::{Ip4, KernelRoute, LocalNetwork};
use crate::error::{RouteError, RouteResult};

pub struct InMemoryRouteTable {
    interfaces: Vec<LocalNetwork>,
    routes: Mutex<Vec<KernelRoute>>,
    failing: Mutex<HashSet<Ipv4Net>>,
    fail_reads: AtomicBool,
    mutations: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryRouteTable {
    /// Interfaces are `(name, index, "addr/len")`
    pub fn new(interfaces: Vec<(&str, u32, &str)>) -> Self {
        let interfaces = interfaces
            .into_iter()
            .map(|(name, index, cidr)| {
                let (ip, len) = cidr.split_once('/').expect("addr/len");
                LocalNetwork {
                    interface_name: name.to_string(),
                    interface_index: index,
                    subnets: vec![Ip4::new(ip.parse().expect("ipv4"), len.parse().expect("prefix")).expect("subnet")],
                }
            })
            .collect();

        InMemoryRouteTable {
            interfaces,
            routes: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            fail_reads: AtomicBool::new(false),
            mutations: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn inventory(&self) -> LocalNetworkInventory {
        LocalNetworkInventory::from_interfaces(self.interfaces.clone()).expect("test inventory")
    }

    /// Put a route in place without counting it as a mutation
    pub fn seed(&self, destination: Ipv4Net, gateway: Option<Ipv4Addr>, interface_index: Option<u32>) {
        self.routes.lock().unwrap().push(KernelRoute {
            destination,
            gateway,
            interface_index,
        });
    }

    pub fn clear(&self) {
        self.routes.lock().unwrap().clear();
    }

    pub fn snapshot(&self) -> Vec<KernelRoute> {
        self.routes.lock().unwrap().clone()
    }

    pub fn fail_uninstall(&self, destination: Ipv4Net) {
        self.failing.lock().unwrap().insert(destination);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InterfaceSource for InMemoryRouteTable {
    async fn interfaces(&self) -> RouteResult<Vec<LocalNetwork>> {
        Ok(self.interfaces.clone())
    }
}

#[async_trait]
impl KernelRouteTable for InMemoryRouteTable {
    async fn routes(&self) -> RouteResult<Vec<KernelRoute>> {
        self.enter().await;
        let result = if self.fail_reads.load(Ordering::SeqCst) {
            Err(RouteError::KernelOperationFailed("Operation not permitted".to_string()))
        } else {
            Ok(self.snapshot())
        };
        self.leave();
        result
    }

    async fn interface_name(&self, index: u32) -> RouteResult<String> {
        self.interfaces
            .iter()
            .find(|n| n.interface_index == index)
            .map(|n| n.interface_name.clone())
            .ok_or_else(|| RouteError::KernelOperationFailed(format!("link {} not found", index)))
    }

    async fn install(&self, destination: Ipv4Net, gateway: Ipv4Addr, index: u32) -> RouteResult<()> {
        self.enter().await;
        let result = {
            let mut routes = self.routes.lock().unwrap();
            if routes.iter().any(|r| r.destination == destination) {
                Err(RouteError::KernelOperationFailed("File exists".to_string()))
            } else {
                routes.push(KernelRoute {
                    destination,
                    gateway: Some(gateway),
                    interface_index: Some(index),
                });
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        self.leave();
        result
    }

    async fn uninstall(&self, route: &KernelRoute) -> RouteResult<()> {
        self.enter().await;
        let result = if self.failing.lock().unwrap().contains(&route.destination) {
            Err(RouteError::KernelOperationFailed("Operation not permitted".to_string()))
        } else {
            let mut routes = self.routes.lock().unwrap();
            let before = routes.len();
            routes.retain(|r| r != route);
            if routes.len() != before {
                self.mutations.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        };
        self.leave();
        result
    }
}
