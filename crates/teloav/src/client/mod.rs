//! Remote client capability
//!
//! The discovery core only needs four things from an OPC UA client: list a
//! node's children, and read a node's class, browse name and data type.
//! Transports implement [`Connector`] and [`Connection`]:
//!
//! - [`memory`]: in-process address spaces (tests and offline dry runs)
//! - `opcua`: the real OPC UA transport (cargo feature `opcua`)

pub mod memory;
#[cfg(feature = "opcua")]
pub mod opcua;

use crate::error::ClientError;
use crate::types::{NodeClass, NodeId};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub use memory::{MemoryAddressSpace, MemoryConnector};
#[cfg(feature = "opcua")]
pub use self::opcua::OpcUaConnector;

/// Opens scoped connections to endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, ClientError>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for Box<T> {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, ClientError> {
        (**self).connect(endpoint).await
    }
}

/// A live session with one server, positioned at its root node.
///
/// Callers must `close` the connection when done; implementations also
/// release their resources on drop.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Root of the walk (the server's Objects folder).
    fn root(&self) -> NodeId;

    /// Hierarchical children of `node`, in server order.
    async fn children(&self, node: &NodeId) -> Result<Vec<NodeId>, ClientError>;

    async fn node_class(&self, node: &NodeId) -> Result<NodeClass, ClientError>;

    async fn browse_name(&self, node: &NodeId) -> Result<String, ClientError>;

    /// Human-readable name of the declared data type, if the server has one.
    async fn data_type(&self, node: &NodeId) -> Result<Option<String>, ClientError>;

    async fn close(self: Box<Self>) -> Result<(), ClientError>;
}

/// Run a remote call under an optional deadline.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(limit)),
        },
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_passes_result_through() {
        let value = with_deadline(Some(Duration::from_secs(1)), async { Ok::<_, ClientError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_times_out() {
        let result = with_deadline(Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ClientError>(())
        })
        .await;
        assert_eq!(result, Err(ClientError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn test_without_deadline_waits() {
        let result = with_deadline(None, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, ClientError>("done")
        })
        .await;
        assert_eq!(result, Ok("done"));
    }
}
