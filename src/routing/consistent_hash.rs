//! Hash ring routing: a job keeps landing on the same address while the group is stable.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{no_candidates, RouteStrategyHandler};
use crate::constants::CONSISTENT_HASH_VIRTUAL_NODES;
use crate::error::Result;
use crate::models::{RouteStrategy, TriggerEnvelope};

#[derive(Debug)]
pub struct ConsistentHashRoute {
    virtual_nodes: usize,
}

impl Default for ConsistentHashRoute {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsistentHashRoute {
    pub fn new() -> Self {
        Self {
            virtual_nodes: CONSISTENT_HASH_VIRTUAL_NODES,
        }
    }

    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    fn ring<'a>(&self, addresses: &'a [String]) -> BTreeMap<u64, &'a str> {
        let mut ring = BTreeMap::new();
        for address in addresses {
            for replica in 0..self.virtual_nodes {
                ring.insert(hash_key(&format!("SHARD-{address}-NODE-{replica}")), address.as_str());
            }
        }
        ring
    }
}

/// First eight bytes of the SHA-256 digest, big-endian
fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[async_trait]
impl RouteStrategyHandler for ConsistentHashRoute {
    fn strategy(&self) -> RouteStrategy {
        RouteStrategy::ConsistentHash
    }

    async fn route(&self, envelope: &TriggerEnvelope, addresses: &[String]) -> Result<String> {
        let ring = self.ring(addresses);
        let point = hash_key(&envelope.job_id.to_string());
        ring.range(point..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, address)| address.to_string())
            .ok_or_else(|| no_candidates(envelope))
    }
}
