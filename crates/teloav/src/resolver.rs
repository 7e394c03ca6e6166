//! Endpoint resolution from the ingest document.

use crate::document::ConfigDocument;
use crate::error::{DiscoveryError, Result};
use std::collections::HashSet;

/// Endpoints of every recognized input block, first-seen order, de-duplicated
/// by exact string across all kinds.
///
/// Fails with [`DiscoveryError::MissingEndpoint`] when a recognized block has
/// no `endpoint`, a non-string one, or an empty one.
pub fn endpoints_from_document(document: &ConfigDocument) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();

    for block in document.input_blocks()? {
        let endpoint = match block.endpoint() {
            Some(endpoint) if !endpoint.is_empty() => endpoint,
            _ => {
                return Err(DiscoveryError::MissingEndpoint {
                    kind: block.kind.to_string(),
                    index: block.index,
                })
            }
        };
        if seen.insert(endpoint) {
            endpoints.push(endpoint.to_string());
        }
    }

    Ok(endpoints)
}
