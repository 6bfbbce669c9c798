// Desired state file - IP pools, pod CIDR blocks and the nodes that own them

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::StateError;
use crate::routes::parse_cidr;

/// Address range the syncer is allowed to manage routes within
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolEntry {
    pub cidr: String,

    #[serde(default)]
    pub disabled: bool,
}

/// A pod CIDR block assigned to a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockEntry {
    pub cidr: String,
    pub node: String,

    /// Marked for deletion; its route must go
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeEntry {
    pub name: String,

    #[serde(default)]
    pub internal_ip: Option<Ipv4Addr>,
}

/// Resolve a node name to the address its pod traffic is sent to
pub trait NodeLookup {
    fn lookup(&self, name: &str) -> Result<Ipv4Addr, StateError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DesiredState {
    #[serde(default)]
    pub pools: Vec<PoolEntry>,

    #[serde(default)]
    pub nodes: Vec<NodeEntry>,

    #[serde(default)]
    pub blocks: Vec<BlockEntry>,
}

impl DesiredState {
    pub async fn load(path: &Path) -> Result<Self, StateError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, StateError> {
        Ok(toml::from_str(content)?)
    }

    /// Enabled pools with a valid CIDR
    pub fn managed_pools(&self) -> Vec<Ipv4Net> {
        self.pools
            .iter()
            .filter(|pool| !pool.disabled)
            .filter_map(|pool| match parse_cidr(&pool.cidr) {
                Ok(net) => Some(net),
                Err(e) => {
                    tracing::warn!("ignoring pool: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Destinations of every block not marked deleted
    pub fn desired_destinations(&self) -> Vec<Ipv4Net> {
        self.blocks
            .iter()
            .filter(|block| !block.deleted)
            .filter_map(|block| parse_cidr(&block.cidr).ok())
            .collect()
    }
}

impl NodeLookup for DesiredState {
    fn lookup(&self, name: &str) -> Result<Ipv4Addr, StateError> {
        let node = self
            .nodes
            .iter()
            .find(|node| node.name == name)
            .ok_or_else(|| StateError::NodeNotFound(name.to_string()))?;
        node.internal_ip
            .ok_or_else(|| StateError::NodeAddressMissing(name.to_string()))
    }
}
