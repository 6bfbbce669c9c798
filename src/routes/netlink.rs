// Netlink backend for the kernel route table and interface inventory

use async_trait::async_trait;
use futures::TryStreamExt;
use ipnet::Ipv4Net;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
use rtnetlink::{Handle, IpVersion};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use super::inventory::InterfaceSource;
use super::table::KernelRouteTable;
use super::{Ip4, KernelRoute, LocalNetwork};
use crate::error::{RouteError, RouteResult};

const RT_TABLE_MAIN: u32 = 254;

/// Kernel route table reached over a single rtnetlink connection
pub struct NetlinkRouteTable {
    handle: Handle,
}

impl NetlinkRouteTable {
    /// Open the netlink socket. Must be called inside a tokio runtime, which
    /// drives the connection task.
    pub fn new() -> RouteResult<Self> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(kernel_error)?;
        tokio::spawn(connection);
        Ok(NetlinkRouteTable { handle })
    }

    async fn route_messages(&self) -> RouteResult<Vec<RouteMessage>> {
        let messages: Vec<RouteMessage> = self
            .handle
            .route()
            .get(IpVersion::V4)
            .execute()
            .try_collect()
            .await
            .map_err(kernel_error)?;
        Ok(messages
            .into_iter()
            .filter(|message| route_table(message) == RT_TABLE_MAIN)
            .collect())
    }

    async fn link_messages(&self) -> RouteResult<Vec<LinkMessage>> {
        self.handle
            .link()
            .get()
            .execute()
            .try_collect()
            .await
            .map_err(kernel_error)
    }

    async fn address_messages(&self) -> RouteResult<Vec<AddressMessage>> {
        self.handle
            .address()
            .get()
            .execute()
            .try_collect()
            .await
            .map_err(kernel_error)
    }
}

#[async_trait]
impl InterfaceSource for NetlinkRouteTable {
    async fn interfaces(&self) -> RouteResult<Vec<LocalNetwork>> {
        let links = self.link_messages().await?;

        let mut by_link: HashMap<u32, Vec<Ip4>> = HashMap::new();
        for message in self.address_messages().await? {
            if let Some(ip) = address_v4(&message) {
                by_link
                    .entry(message.header.index)
                    .or_default()
                    .push(Ip4::new(ip, message.header.prefix_len)?);
            }
        }

        Ok(links
            .iter()
            .filter_map(|link| {
                let name = link_name(link)?;
                let index = link.header.index;
                Some(LocalNetwork {
                    interface_name: name,
                    interface_index: index,
                    subnets: by_link.remove(&index).unwrap_or_default(),
                })
            })
            .collect())
    }
}

#[async_trait]
impl KernelRouteTable for NetlinkRouteTable {
    async fn routes(&self) -> RouteResult<Vec<KernelRoute>> {
        Ok(self
            .route_messages()
            .await?
            .iter()
            .filter_map(kernel_route)
            .collect())
    }

    async fn interface_name(&self, index: u32) -> RouteResult<String> {
        let links: Vec<LinkMessage> = self
            .handle
            .link()
            .get()
            .match_index(index)
            .execute()
            .try_collect()
            .await
            .map_err(kernel_error)?;
        match links.first() {
            Some(link) => link_name(link)
                .ok_or_else(|| RouteError::KernelOperationFailed(format!("link {} has no name", index))),
            None => Err(RouteError::KernelOperationFailed(format!("link {} not found", index))),
        }
    }

    async fn install(&self, destination: Ipv4Net, gateway: Ipv4Addr, index: u32) -> RouteResult<()> {
        self.handle
            .route()
            .add()
            .v4()
            .destination_prefix(destination.network(), destination.prefix_len())
            .gateway(gateway)
            .output_interface(index)
            .execute()
            .await
            .map_err(kernel_error)
    }

    async fn uninstall(&self, route: &KernelRoute) -> RouteResult<()> {
        let matching: Vec<RouteMessage> = self
            .route_messages()
            .await?
            .into_iter()
            .filter(|message| kernel_route(message).as_ref() == Some(route))
            .collect();

        for message in matching {
            match self.handle.route().del(message).execute().await {
                Ok(()) => {}
                Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::ESRCH => {
                    tracing::debug!("route [{}] already gone", route.destination);
                }
                Err(e) => return Err(kernel_error(e)),
            }
        }
        Ok(())
    }
}

fn kernel_error<E: std::fmt::Display>(e: E) -> RouteError {
    RouteError::KernelOperationFailed(e.to_string())
}

fn route_table(message: &RouteMessage) -> u32 {
    message
        .attributes
        .iter()
        .find_map(|attr| match attr {
            RouteAttribute::Table(table) => Some(*table),
            _ => None,
        })
        .unwrap_or(message.header.table as u32)
}

/// Convert a route message, skipping routes without an explicit destination
fn kernel_route(message: &RouteMessage) -> Option<KernelRoute> {
    let mut destination = None;
    let mut gateway = None;
    let mut interface_index = None;

    for attr in &message.attributes {
        match attr {
            RouteAttribute::Destination(RouteAddress::Inet(addr)) => destination = Some(*addr),
            RouteAttribute::Gateway(RouteAddress::Inet(addr)) => gateway = Some(*addr),
            RouteAttribute::Oif(index) => interface_index = Some(*index),
            _ => {}
        }
    }

    let destination = Ipv4Net::new(destination?, message.header.destination_prefix_length).ok()?;
    Some(KernelRoute {
        destination,
        gateway,
        interface_index,
    })
}

fn link_name(link: &LinkMessage) -> Option<String> {
    link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

/// The interface's own IPv4 address. Point-to-point links report the peer in
/// `Address`, so `Local` wins when present.
fn address_v4(message: &AddressMessage) -> Option<Ipv4Addr> {
    let mut address = None;
    for attr in &message.attributes {
        match attr {
            AddressAttribute::Local(IpAddr::V4(ip)) => return Some(*ip),
            AddressAttribute::Address(IpAddr::V4(ip)) => address = Some(*ip),
            _ => {}
        }
    }
    address
}
