//! Discovery session: connect, walk, classify the outcome for one endpoint.
//!
//! Transport failures never propagate out of [`discover_endpoint`]; they are
//! turned into a [`DiscoveryStatus`] so one unreachable server cannot abort
//! the cycle for the others.

use crate::client::{with_deadline, Connector};
use crate::types::{DiscoveryResult, DiscoveryStatus};
use crate::walker::{AddressSpaceWalker, WalkOptions};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Run one discovery session against `endpoint`.
///
/// The connection is closed on every path once it has been opened.
pub async fn discover_endpoint(
    connector: &dyn Connector,
    endpoint: &str,
    options: &WalkOptions,
) -> DiscoveryResult {
    info!(endpoint = %endpoint, "Starting discovery");
    let start = Instant::now();

    debug!(endpoint = %endpoint, "Connecting");
    let connect = connector.connect(endpoint);
    let connection = match with_deadline(options.request_timeout, connect).await {
        Ok(connection) => connection,
        Err(e) if e.is_connection_failure() => {
            error!(endpoint = %endpoint, error = %e, "Connection failed");
            return DiscoveryResult::connection_failed(endpoint);
        }
        Err(e) => {
            error!(endpoint = %endpoint, error = %e, "Unexpected error discovering nodes");
            return DiscoveryResult::error(endpoint, &e.detail());
        }
    };
    debug!(endpoint = %endpoint, "Connected");

    let mut nodes = Vec::new();
    let root = connection.root();
    let stats = AddressSpaceWalker::new(connection.as_ref(), options)
        .walk(&root, &mut nodes)
        .await;

    if let Err(e) = connection.close().await {
        warn!(endpoint = %endpoint, error = %e, "Failed to close connection cleanly");
    }

    info!(
        endpoint = %endpoint,
        nodes = nodes.len(),
        visited = stats.nodes_visited,
        failed = stats.nodes_failed,
        truncated = stats.branches_truncated,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Discovered {} nodes",
        nodes.len()
    );

    DiscoveryResult::connected(endpoint, nodes)
}

/// Discover each endpoint in order, one at a time.
pub async fn discover_all(
    connector: &dyn Connector,
    endpoints: &[String],
    options: &WalkOptions,
) -> Vec<DiscoveryResult> {
    let mut results = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        results.push(discover_endpoint(connector, endpoint, options).await);
    }
    let failed = results
        .iter()
        .filter(|r| r.status != DiscoveryStatus::Connected)
        .count();
    if failed > 0 {
        warn!(failed, total = results.len(), "Some endpoints could not be discovered");
    }
    results
}
