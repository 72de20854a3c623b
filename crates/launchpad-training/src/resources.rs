//! Cluster topology: how many nodes, how many devices per node, and where
//! the nodes live.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

/// Control port used for multi-node runs.
pub const DEFAULT_CTRL_PORT: u16 = 12138;

/// A single machine in a multi-node run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddr {
    pub addr: String,
}

impl NodeAddr {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

/// Parse a comma separated node list such as `"10.0.0.1, 10.0.0.2"`.
///
/// Surrounding whitespace and empty entries are dropped.
#[must_use]
pub fn parse_node_list(list: &str) -> Vec<NodeAddr> {
    list.trim()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(NodeAddr::new)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterResources {
    pub node_num: u32,
    pub gpu_num_per_node: u32,
    #[serde(default)]
    pub nodes: Vec<NodeAddr>,
    #[serde(default)]
    pub ctrl_port: Option<u16>,
}

impl ClusterResources {
    #[must_use]
    pub fn single_node(gpu_num_per_node: u32) -> Self {
        Self { node_num: 1, gpu_num_per_node, nodes: Vec::new(), ctrl_port: None }
    }

    #[must_use]
    pub fn multi_node(node_num: u32, gpu_num_per_node: u32, nodes: Vec<NodeAddr>) -> Self {
        Self { node_num, gpu_num_per_node, nodes, ctrl_port: None }
    }

    #[must_use]
    pub fn with_ctrl_port(mut self, port: u16) -> Self {
        self.ctrl_port = Some(port);
        self
    }

    #[must_use]
    pub fn total_device_num(&self) -> u64 {
        u64::from(self.node_num) * u64::from(self.gpu_num_per_node)
    }

    #[must_use]
    pub fn global_batch_size(&self, batch_size_per_device: u32) -> u64 {
        self.total_device_num() * u64::from(batch_size_per_device)
    }

    #[must_use]
    pub fn is_multi_node(&self) -> bool {
        self.node_num > 1
    }

    /// The machines that take part in the run: the first `node_num` addresses,
    /// or nothing for a single-node run.
    #[must_use]
    pub fn machines(&self) -> Vec<NodeAddr> {
        if !self.is_multi_node() {
            return Vec::new();
        }
        self.nodes.iter().take(self.node_num as usize).cloned().collect()
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.node_num == 0 {
            return Err(TrainingError::invalid("node_num must be >= 1"));
        }
        if self.gpu_num_per_node == 0 {
            return Err(TrainingError::invalid("gpu_num_per_node must be >= 1"));
        }
        if self.is_multi_node() && self.nodes.len() < self.node_num as usize {
            return Err(TrainingError::invalid(format!(
                "node_num is {} but only {} node address(es) were given",
                self.node_num,
                self.nodes.len()
            )));
        }
        Ok(())
    }
}
