// Routes module - route value types, CIDR handling and the kernel route table

pub mod inventory;
pub mod lookup;
#[cfg(test)]
pub mod memory;
pub mod netlink;
pub mod table;

use ipnet::Ipv4Net;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{RouteError, RouteResult};

/// A desired route: traffic for `destination` goes to `gateway`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub destination: Ipv4Net,
    pub gateway: Ipv4Addr,
}

impl Route {
    pub fn new(destination: Ipv4Net, gateway: Ipv4Addr) -> Self {
        Route {
            destination,
            gateway,
        }
    }
}

/// A route as currently installed in the kernel main table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelRoute {
    pub destination: Ipv4Net,
    pub gateway: Option<Ipv4Addr>,
    pub interface_index: Option<u32>,
}

/// An IPv4 address assigned to a local interface, with the subnet it sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ip4 {
    pub network: Ipv4Net,
    pub ip: Ipv4Addr,
}

impl Ip4 {
    pub fn new(ip: Ipv4Addr, prefix_len: u8) -> RouteResult<Self> {
        let network = Ipv4Net::new(ip, prefix_len)
            .map_err(|_| RouteError::InvalidCidr(format!("{}/{}", ip, prefix_len)))?
            .trunc();
        Ok(Ip4 { network, ip })
    }
}

/// A local interface together with its IPv4 subnets, in kernel order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalNetwork {
    pub interface_name: String,
    pub interface_index: u32,
    pub subnets: Vec<Ip4>,
}

/// Parse an IPv4 CIDR string, masking any host bits.
///
/// `"10.1.2.5/26"` yields `10.1.2.0/26`. A bare address or an IPv6 prefix is
/// rejected.
pub fn parse_cidr(cidr: &str) -> RouteResult<Ipv4Net> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| RouteError::InvalidCidr(cidr.to_string()))?;
    // u8::from_str accepts a leading '+'
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RouteError::InvalidCidr(cidr.to_string()));
    }

    let addr: IpAddr = addr
        .parse()
        .map_err(|_| RouteError::InvalidCidr(cidr.to_string()))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| RouteError::InvalidCidr(cidr.to_string()))?;

    match addr {
        IpAddr::V4(v4) => Ipv4Net::new(v4, prefix)
            .map(|net| net.trunc())
            .map_err(|_| RouteError::InvalidCidr(cidr.to_string())),
        IpAddr::V6(_) => Err(RouteError::InvalidCidr(cidr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr_masks_host_bits() {
        let net = parse_cidr("10.1.2.5/26").unwrap();
        assert_eq!(net, "10.1.2.0/26".parse::<Ipv4Net>().unwrap());
        assert_eq!(parse_cidr("10.244.0.0/16").unwrap().prefix_len(), 16);
    }

    #[test]
    fn test_parse_cidr_rejects_malformed() {
        for bad in [
            "",
            "10.1.2.0",
            "10.1.2.0/",
            "10.1.2.0/33",
            "10.1.300.0/24",
            "fd00::/64",
            "nonsense/8",
            "10.1.2.0/+24",
            "10.1.2.0/-0",
            " 10.1.2.0/24",
            "10.1.2.0/24\n",
        ] {
            assert_eq!(parse_cidr(bad), Err(RouteError::InvalidCidr(bad.to_string())), "{bad}");
        }
    }

    #[test]
    fn test_ip4_network() {
        let ip4 = Ip4::new(Ipv4Addr::new(192, 168, 1, 20), 24).unwrap();
        assert_eq!(ip4.network, "192.168.1.0/24".parse::<Ipv4Net>().unwrap());
        assert_eq!(ip4.ip, Ipv4Addr::new(192, 168, 1, 20));
        assert!(Ip4::new(Ipv4Addr::new(192, 168, 1, 20), 40).is_err());
    }
}
