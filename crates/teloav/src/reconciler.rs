//! Config reconciliation
//!
//! Merges one cycle's discovery results into the egress document.
//!
//! The merged document is built from the ingest document, so its structure
//! and non-`nodes` fields follow the ingest file. Each recognized block first
//! takes its `nodes` from the previous egress document (same kind, same
//! index, same endpoint); that list is the baseline the fresh discovery is compared against.
//! A block is updated only when its endpoint produced a non-empty list that
//! differs from the baseline. An empty result never clears existing nodes.

use crate::document::{ConfigDocument, ENDPOINT_KEY, NODES_KEY};
use crate::types::DiscoveryResult;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub document: ConfigDocument,
    /// Whether `document` differs from the previous egress document
    /// (always true when there was none).
    pub changed: bool,
    /// Blocks whose `nodes` were replaced by fresh discovery.
    pub updated_blocks: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    include_data_type: bool,
}

impl Reconciler {
    pub fn new(include_data_type: bool) -> Self {
        Self { include_data_type }
    }

    pub fn reconcile(
        &self,
        ingest: &ConfigDocument,
        previous: Option<&ConfigDocument>,
        results: &[DiscoveryResult],
    ) -> Reconciliation {
        let by_endpoint: HashMap<&str, &DiscoveryResult> =
            results.iter().map(|r| (r.endpoint.as_str(), r)).collect();

        // Positions are taken from the ingest document; blocks it cannot
        // describe are left for the resolver to reject.
        let positions: Vec<(String, usize)> = ingest
            .input_blocks()
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|b| (b.kind.to_string(), b.index))
                    .collect()
            })
            .unwrap_or_default();

        let mut document = ingest.clone();
        let mut updated_blocks = 0;

        for (kind, index) in positions {
            let Some(block) = document.block_mut(&kind, index) else {
                continue;
            };
            let endpoint = block
                .get(ENDPOINT_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string);

            // A previous block only counts as the baseline while it still
            // describes the same server.
            let baseline = previous
                .and_then(|prev| prev.block(&kind, index))
                .filter(|prev| {
                    prev.get(ENDPOINT_KEY).and_then(|v| v.as_str()) == endpoint.as_deref()
                })
                .and_then(|prev| prev.get(NODES_KEY))
                .cloned();
            if let Some(nodes) = &baseline {
                block.insert(NODES_KEY.to_string(), nodes.clone());
            }

            let Some(endpoint) = endpoint else {
                continue;
            };
            let Some(result) = by_endpoint.get(endpoint.as_str()) else {
                continue;
            };

            if result.nodes.is_empty() {
                warn!(endpoint = %endpoint, "No nodes discovered for endpoint, skipping update");
                continue;
            }

            let fresh = toml::Value::Array(
                result
                    .nodes
                    .iter()
                    .map(|node| toml::Value::Table(node.to_table(self.include_data_type)))
                    .collect(),
            );

            if baseline.as_ref() == Some(&fresh) {
                debug!(endpoint = %endpoint, "No changes detected for endpoint");
                continue;
            }

            debug!(
                endpoint = %endpoint,
                previous = baseline.as_ref().and_then(|v| v.as_array()).map_or(0, |a| a.len()),
                new = result.nodes.len(),
                "Updated nodes for endpoint"
            );
            block.insert(NODES_KEY.to_string(), fresh);
            updated_blocks += 1;
        }

        let changed = match previous {
            None => true,
            Some(prev) => prev != &document,
        };

        Reconciliation {
            document,
            changed,
            updated_blocks,
        }
    }
}
