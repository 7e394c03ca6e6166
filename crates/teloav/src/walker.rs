//! Address-space walker
//!
//! Depth-first, pre-order traversal below a root node. Every `Variable`
//! outside the reserved namespace becomes a [`VariableDescriptor`], and the
//! walk continues below variables as well as objects.
//!
//! # Failure isolation
//!
//! - child fetch fails: that branch is truncated, siblings continue
//! - class / browse name read fails: that node and its subtree are skipped
//! - data type read fails: recorded as `"Unknown"`, node is kept
//!
//! Nothing here returns an error; failures are logged at debug level and
//! counted in [`WalkStats`].

use crate::client::{with_deadline, Connection};
use crate::encoder;
use crate::error::ClientError;
use crate::types::{NodeClass, NodeId, VariableDescriptor, UNKNOWN_DATA_TYPE};
use std::time::Duration;
use tracing::debug;

/// Namespace of the standard OPC UA nodes. Variables here are never reported.
pub const RESERVED_NAMESPACE: u16 = 0;

/// Default bound on walk depth below the root.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Options for a walk
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Nodes deeper than this (root children are depth 1) are not expanded
    pub max_depth: usize,
    /// Deadline applied to each remote call
    pub request_timeout: Option<Duration>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            request_timeout: None,
        }
    }
}

/// Counters for one walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub nodes_visited: usize,
    pub variables_found: usize,
    pub reserved_skipped: usize,
    pub nodes_failed: usize,
    pub branches_truncated: usize,
    pub depth_limited: usize,
}

/// Walks one connection's address space.
pub struct AddressSpaceWalker<'a> {
    connection: &'a dyn Connection,
    options: &'a WalkOptions,
}

impl<'a> AddressSpaceWalker<'a> {
    pub fn new(connection: &'a dyn Connection, options: &'a WalkOptions) -> Self {
        Self {
            connection,
            options,
        }
    }

    /// Walk below `root`, appending descriptors to `out` in pre-order.
    ///
    /// Uses an explicit stack instead of recursion, so memory is bounded by
    /// the frontier rather than by per-level result lists.
    pub async fn walk(&self, root: &NodeId, out: &mut Vec<VariableDescriptor>) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        self.expand(root, 0, &mut stack, &mut stats).await;

        while let Some((node, depth)) = stack.pop() {
            stats.nodes_visited += 1;
            if let Err(e) = self.visit(&node, out, &mut stats).await {
                stats.nodes_failed += 1;
                debug!(node = %node, error = %e, "Error processing node, skipping it");
                continue;
            }
            self.expand(&node, depth, &mut stack, &mut stats).await;
        }

        stats
    }

    /// Push the children of `node` so the first child is popped next.
    async fn expand(
        &self,
        node: &NodeId,
        depth: usize,
        stack: &mut Vec<(NodeId, usize)>,
        stats: &mut WalkStats,
    ) {
        if depth >= self.options.max_depth {
            stats.depth_limited += 1;
            debug!(node = %node, depth, "Maximum browse depth reached, not expanding");
            return;
        }

        match with_deadline(self.options.request_timeout, self.connection.children(node)).await {
            Ok(children) => {
                stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
            }
            Err(e) => {
                stats.branches_truncated += 1;
                debug!(node = %node, error = %e, "Failed to get children for node");
            }
        }
    }

    async fn visit(
        &self,
        node: &NodeId,
        out: &mut Vec<VariableDescriptor>,
        stats: &mut WalkStats,
    ) -> Result<(), ClientError> {
        let timeout = self.options.request_timeout;
        let class = with_deadline(timeout, self.connection.node_class(node)).await?;
        if class != NodeClass::Variable {
            return Ok(());
        }
        if node.namespace == RESERVED_NAMESPACE {
            stats.reserved_skipped += 1;
            return Ok(());
        }

        let name = with_deadline(timeout, self.connection.browse_name(node)).await?;
        let data_type = match with_deadline(timeout, self.connection.data_type(node)).await {
            Ok(Some(data_type)) => data_type,
            Ok(None) => UNKNOWN_DATA_TYPE.to_string(),
            Err(e) => {
                debug!(name = %name, error = %e, "Failed to read data type");
                UNKNOWN_DATA_TYPE.to_string()
            }
        };

        let (identifier_type, identifier) = encoder::encode(&node.identifier);
        debug!(name = %name, ns = node.namespace, "Discovered node");
        out.push(VariableDescriptor {
            name,
            namespace: node.namespace.to_string(),
            identifier_type,
            identifier,
            data_type: Some(data_type),
        });
        stats.variables_found += 1;
        Ok(())
    }
}
