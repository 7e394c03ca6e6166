//! In-process address spaces
//!
//! A `MemoryConnector` serves one `MemoryAddressSpace` per endpoint. Used by
//! the test suite and by `--address-space <snapshot.json>` dry runs, where
//! the snapshot maps endpoint URLs to node trees:
//!
//! ```json
//! {
//!   "opc.tcp://plc-1:4840": {
//!     "id": "ns=0;i=85", "class": "object", "browse_name": "Objects",
//!     "children": [
//!       { "id": "ns=2;s=Boiler.Temp", "class": "variable",
//!         "browse_name": "Temp", "data_type": "Double" }
//!     ]
//!   }
//! }
//! ```

use super::{Connection, Connector};
use crate::error::{ClientError, DiscoveryError, Result};
use crate::types::{NodeClass, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Serializable node tree used by snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: NodeId,
    pub class: NodeClass,
    pub browse_name: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub children: Vec<MemoryNode>,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    class: NodeClass,
    browse_name: String,
    data_type: Option<String>,
    children: Vec<NodeId>,
}

/// A server's address space held in memory.
#[derive(Debug, Clone)]
pub struct MemoryAddressSpace {
    root: NodeId,
    nodes: HashMap<NodeId, NodeEntry>,
    failing_children: HashSet<NodeId>,
    failing_reads: HashSet<NodeId>,
    failing_data_types: HashSet<NodeId>,
}

impl Default for MemoryAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAddressSpace {
    /// Empty address space rooted at the standard Objects folder.
    pub fn new() -> Self {
        Self::with_root(NodeId::objects_folder(), "Objects")
    }

    pub fn with_root(root: NodeId, browse_name: &str) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            root.clone(),
            NodeEntry {
                class: NodeClass::Object,
                browse_name: browse_name.to_string(),
                data_type: None,
                children: Vec::new(),
            },
        );
        Self {
            root,
            nodes,
            failing_children: HashSet::new(),
            failing_reads: HashSet::new(),
            failing_data_types: HashSet::new(),
        }
    }

    /// Build from a snapshot tree; the tree's root becomes the walk root.
    pub fn from_tree(tree: &MemoryNode) -> Self {
        let mut space = Self::with_root(tree.id.clone(), &tree.browse_name);
        for child in &tree.children {
            space.insert_tree(&tree.id, child);
        }
        space
    }

    fn insert_tree(&mut self, parent: &NodeId, node: &MemoryNode) {
        self.add_node(
            parent,
            node.id.clone(),
            node.class,
            &node.browse_name,
            node.data_type.as_deref(),
        );
        for child in &node.children {
            self.insert_tree(&node.id, child);
        }
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    /// Add a node under `parent`. Re-adding an existing id only adds the
    /// reference, so the same node can hang below several parents.
    pub fn add_node(
        &mut self,
        parent: &NodeId,
        id: NodeId,
        class: NodeClass,
        browse_name: &str,
        data_type: Option<&str>,
    ) -> &mut Self {
        self.nodes.entry(id.clone()).or_insert_with(|| NodeEntry {
            class,
            browse_name: browse_name.to_string(),
            data_type: data_type.map(str::to_string),
            children: Vec::new(),
        });
        self.add_reference(parent, id)
    }

    pub fn add_object(&mut self, parent: &NodeId, id: NodeId, browse_name: &str) -> &mut Self {
        self.add_node(parent, id, NodeClass::Object, browse_name, None)
    }

    pub fn add_variable(
        &mut self,
        parent: &NodeId,
        id: NodeId,
        browse_name: &str,
        data_type: Option<&str>,
    ) -> &mut Self {
        self.add_node(parent, id, NodeClass::Variable, browse_name, data_type)
    }

    /// Add a hierarchical reference from `parent` to an existing node.
    pub fn add_reference(&mut self, parent: &NodeId, child: NodeId) -> &mut Self {
        if let Some(entry) = self.nodes.get_mut(parent) {
            entry.children.push(child);
        }
        self
    }

    /// Make child browsing of `id` fail.
    pub fn fail_children(&mut self, id: NodeId) -> &mut Self {
        self.failing_children.insert(id);
        self
    }

    /// Make every attribute read of `id` fail.
    pub fn fail_reads(&mut self, id: NodeId) -> &mut Self {
        self.failing_reads.insert(id);
        self
    }

    /// Make only the data type read of `id` fail.
    pub fn fail_data_type(&mut self, id: NodeId) -> &mut Self {
        self.failing_data_types.insert(id);
        self
    }

    fn entry(&self, id: &NodeId) -> std::result::Result<&NodeEntry, ClientError> {
        if self.failing_reads.contains(id) {
            return Err(ClientError::Request(format!("BadNotReadable: {}", id)));
        }
        self.nodes
            .get(id)
            .ok_or_else(|| ClientError::Request(format!("BadNodeIdUnknown: {}", id)))
    }
}

/// Connector over in-memory address spaces keyed by endpoint.
///
/// Endpoints without an address space are unreachable.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    spaces: HashMap<String, Arc<MemoryAddressSpace>>,
    failures: HashMap<String, ClientError>,
    live: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: &str, space: MemoryAddressSpace) -> Self {
        self.insert(endpoint, space);
        self
    }

    pub fn insert(&mut self, endpoint: &str, space: MemoryAddressSpace) {
        self.spaces.insert(endpoint.to_string(), Arc::new(space));
    }

    /// Make connecting to `endpoint` fail with `error`.
    pub fn fail_endpoint(mut self, endpoint: &str, error: ClientError) -> Self {
        self.failures.insert(endpoint.to_string(), error);
        self
    }

    /// Connections opened and not yet released.
    pub fn open_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Connections opened over the connector's lifetime.
    pub fn total_connections(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Load a `{endpoint: tree}` JSON snapshot.
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let trees: HashMap<String, MemoryNode> = serde_json::from_str(&content)?;
        if trees.is_empty() {
            return Err(DiscoveryError::Config(format!(
                "Address space snapshot {} has no endpoints",
                path.display()
            )));
        }
        let mut connector = Self::new();
        for (endpoint, tree) in &trees {
            connector.insert(endpoint, MemoryAddressSpace::from_tree(tree));
        }
        Ok(connector)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> std::result::Result<Box<dyn Connection>, ClientError> {
        if let Some(error) = self.failures.get(endpoint) {
            return Err(error.clone());
        }
        let space = self
            .spaces
            .get(endpoint)
            .cloned()
            .ok_or_else(|| {
                ClientError::Connection(format!("No server reachable at {}", endpoint))
            })?;

        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            space,
            live: Arc::clone(&self.live),
        }))
    }
}

struct MemoryConnection {
    space: Arc<MemoryAddressSpace>,
    live: Arc<AtomicUsize>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn root(&self) -> NodeId {
        self.space.root.clone()
    }

    async fn children(&self, node: &NodeId) -> std::result::Result<Vec<NodeId>, ClientError> {
        if self.space.failing_children.contains(node) {
            return Err(ClientError::Request(format!("BadBrowseFailed: {}", node)));
        }
        self.space
            .nodes
            .get(node)
            .map(|entry| entry.children.clone())
            .ok_or_else(|| ClientError::Request(format!("BadNodeIdUnknown: {}", node)))
    }

    async fn node_class(&self, node: &NodeId) -> std::result::Result<NodeClass, ClientError> {
        self.space.entry(node).map(|entry| entry.class)
    }

    async fn browse_name(&self, node: &NodeId) -> std::result::Result<String, ClientError> {
        self.space.entry(node).map(|entry| entry.browse_name.clone())
    }

    async fn data_type(&self, node: &NodeId) -> std::result::Result<Option<String>, ClientError> {
        if self.space.failing_data_types.contains(node) {
            return Err(ClientError::Request(format!("BadAttributeIdInvalid: {}", node)));
        }
        self.space.entry(node).map(|entry| entry.data_type.clone())
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), ClientError> {
        Ok(())
    }
}
