//! Target node resolution for pinned driver instances
//!
//! A per-run driver instance, its storage class and its test pods must agree
//! on one node. The resolver reads the schedulable nodes once and lets an
//! injected [`NodeSelector`] choose among them. Nothing is reserved: two runs
//! picking the same node is fine because their names never collide.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use csi_e2e_common::kube_utils::is_node_schedulable;
use csi_e2e_common::retry::{retry_with_backoff_if, RetryConfig};

use crate::{Error, Result};

/// Read-only view of the cluster's nodes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// Names of nodes that can currently receive a pinned driver instance
    async fn schedulable_nodes(&self) -> Result<Vec<String>>;
}

/// [`NodeInventory`] backed by the Kubernetes API
pub struct KubeNodeInventory {
    client: Client,
}

impl KubeNodeInventory {
    /// Create an inventory using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeInventory for KubeNodeInventory {
    async fn schedulable_nodes(&self) -> Result<Vec<String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = retry_with_backoff_if(
            &RetryConfig::default(),
            "list_nodes",
            Error::is_retryable,
            || async { api.list(&ListParams::default()).await.map_err(Error::from) },
        )
        .await?;

        let total = nodes.items.len();
        let names: Vec<String> = nodes
            .items
            .iter()
            .filter(|node| is_node_schedulable(node))
            .filter_map(|node| node.metadata.name.clone())
            .collect();
        debug!(total, schedulable = names.len(), "listed nodes");
        Ok(names)
    }
}

/// Fixed node list, for offline rendering and pinned runs
#[derive(Clone, Debug, Default)]
pub struct StaticNodeInventory {
    nodes: Vec<String>,
}

impl StaticNodeInventory {
    /// Inventory reporting exactly `nodes`
    pub fn new(nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl NodeInventory for StaticNodeInventory {
    async fn schedulable_nodes(&self) -> Result<Vec<String>> {
        Ok(self.nodes.clone())
    }
}

/// Strategy choosing one node out of the candidates
pub trait NodeSelector: Send + Sync {
    /// Pick a node; `None` only when `candidates` is empty
    fn select<'a>(&self, candidates: &'a [String]) -> Option<&'a String>;
}

/// Uniform random choice
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomNodeSelector;

impl NodeSelector for RandomNodeSelector {
    fn select<'a>(&self, candidates: &'a [String]) -> Option<&'a String> {
        candidates.choose(&mut rand::thread_rng())
    }
}

/// Always the first candidate in name order
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstNodeSelector;

impl NodeSelector for FirstNodeSelector {
    fn select<'a>(&self, candidates: &'a [String]) -> Option<&'a String> {
        candidates.iter().min()
    }
}

/// Resolves the node a driver instance is pinned to
#[derive(Clone)]
pub struct NodeResolver {
    inventory: Arc<dyn NodeInventory>,
    selector: Arc<dyn NodeSelector>,
}

impl NodeResolver {
    /// Create a resolver from an inventory and a selection strategy
    pub fn new(inventory: Arc<dyn NodeInventory>, selector: Arc<dyn NodeSelector>) -> Self {
        Self {
            inventory,
            selector,
        }
    }

    /// Resolver choosing uniformly at random among schedulable nodes
    pub fn random(inventory: Arc<dyn NodeInventory>) -> Self {
        Self::new(inventory, Arc::new(RandomNodeSelector))
    }

    /// Pick a schedulable node
    ///
    /// Fails with [`Error::NodeResolution`] when the cluster has none.
    pub async fn resolve(&self) -> Result<String> {
        let candidates = self.inventory.schedulable_nodes().await?;
        let node = self
            .selector
            .select(&candidates)
            .cloned()
            .ok_or_else(|| Error::node_resolution("no ready schedulable nodes"))?;
        info!(node = %node, candidates = candidates.len(), "resolved target node");
        Ok(node)
    }
}
