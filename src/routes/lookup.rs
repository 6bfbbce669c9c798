// CIDR containment and gateway to interface selection

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

use super::LocalNetwork;

/// Whether network `a` contains network `b`: `a` is no more specific than
/// `b` and `b`'s network address falls inside `a`.
pub fn contains_cidr(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(b)
}

/// Pick the egress interface for a gateway: the first local network, in
/// discovery order, with a subnet that contains it.
pub fn select_interface(networks: &[LocalNetwork], gateway: Ipv4Addr) -> Option<&LocalNetwork> {
    networks.iter().find(|network| {
        network
            .subnets
            .iter()
            .any(|ip4| ip4.network.contains(&gateway))
    })
}
