//! OPC UA transport (cargo feature `opcua`)
//!
//! The `opcua` client crate is synchronous and drives its own runtime, so it
//! cannot be called from inside the scheduler's runtime. Each connection
//! owns a dedicated thread holding the session; async callers talk to it
//! over a request channel and receive answers on oneshot channels.
//!
//! Connections use anonymous identity with `SecurityPolicy::None`.

use super::{Connection, Connector};
use crate::error::ClientError;
use crate::types::{NodeClass, NodeId, NodeIdentifier};
use async_trait::async_trait;
use opcua::client::prelude as ua;
use opcua::client::prelude::{AttributeService, ViewService};
use opcua::sync::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;
type SharedSession = Arc<RwLock<ua::Session>>;

enum Request {
    Children(NodeId, Reply<Vec<NodeId>>),
    NodeClass(NodeId, Reply<NodeClass>),
    BrowseName(NodeId, Reply<String>),
    DataType(NodeId, Reply<Option<String>>),
    Close(Reply<()>),
}

/// Connector for real OPC UA servers.
#[derive(Debug, Clone)]
pub struct OpcUaConnector {
    application_name: String,
    session_timeout: Option<Duration>,
}

impl OpcUaConnector {
    pub fn new(application_name: &str, session_timeout: Option<Duration>) -> Self {
        Self {
            application_name: application_name.to_string(),
            session_timeout,
        }
    }

    fn build_client(&self) -> Result<ua::Client, ClientError> {
        let mut builder = ua::ClientBuilder::new()
            .application_name(self.application_name.as_str())
            .application_uri(format!("urn:{}", self.application_name))
            .product_uri(format!("urn:{}", self.application_name))
            .trust_server_certs(true)
            .create_sample_keypair(true)
            .session_retry_limit(0);
        if let Some(timeout) = self.session_timeout {
            builder = builder.session_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        }
        builder
            .client()
            .ok_or_else(|| {
                ClientError::Unexpected("invalid OPC UA client configuration".to_string())
            })
    }
}

#[async_trait]
impl Connector for OpcUaConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, ClientError> {
        let client = self.build_client()?;
        let endpoint = endpoint.to_string();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name(format!("opcua-{}", endpoint))
            .spawn(move || session_thread(client, endpoint, ready_tx, request_rx))
            .map_err(|e| {
                ClientError::Unexpected(format!("failed to spawn session thread: {}", e))
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(OpcUaConnection { requests: request_tx })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Unexpected("session thread exited".to_string())),
        }
    }
}

struct OpcUaConnection {
    requests: mpsc::UnboundedSender<Request>,
}

impl OpcUaConnection {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .map_err(|_| ClientError::Connection("session closed".to_string()))?;
        rx.await
            .map_err(|_| ClientError::Connection("session closed".to_string()))?
    }
}

#[async_trait]
impl Connection for OpcUaConnection {
    fn root(&self) -> NodeId {
        NodeId::objects_folder()
    }

    async fn children(&self, node: &NodeId) -> Result<Vec<NodeId>, ClientError> {
        self.call(|reply| Request::Children(node.clone(), reply)).await
    }

    async fn node_class(&self, node: &NodeId) -> Result<NodeClass, ClientError> {
        self.call(|reply| Request::NodeClass(node.clone(), reply)).await
    }

    async fn browse_name(&self, node: &NodeId) -> Result<String, ClientError> {
        self.call(|reply| Request::BrowseName(node.clone(), reply)).await
    }

    async fn data_type(&self, node: &NodeId) -> Result<Option<String>, ClientError> {
        self.call(|reply| Request::DataType(node.clone(), reply)).await
    }

    async fn close(self: Box<Self>) -> Result<(), ClientError> {
        self.call(Request::Close).await
    }
}

// ============================================================================
// Session thread
// ============================================================================

fn session_thread(
    mut client: ua::Client,
    endpoint: String,
    ready: Reply<()>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let session = match client.connect_to_endpoint(
        (
            endpoint.as_str(),
            ua::SecurityPolicy::None.to_str(),
            ua::MessageSecurityMode::None,
            ua::UserTokenPolicy::anonymous(),
        ),
        ua::IdentityToken::Anonymous,
    ) {
        Ok(session) => session,
        Err(status) => {
            let _ = ready.send(Err(ClientError::Connection(format!("{}: {}", endpoint, status))));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        // The caller gave up (deadline) while we were connecting.
        session.write().disconnect();
        return;
    }
    debug!(endpoint = %endpoint, "OPC UA session established");

    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::Children(node, reply) => {
                let _ = reply.send(browse_children(&session, &node));
            }
            Request::NodeClass(node, reply) => {
                let _ = reply.send(read_node_class(&session, &node));
            }
            Request::BrowseName(node, reply) => {
                let _ = reply.send(read_browse_name(&session, &node));
            }
            Request::DataType(node, reply) => {
                let _ = reply.send(read_data_type(&session, &node));
            }
            Request::Close(reply) => {
                session.write().disconnect();
                let _ = reply.send(Ok(()));
                return;
            }
        }
    }

    // Every handle was dropped without an explicit close.
    session.write().disconnect();
}

fn request_error(status: ua::StatusCode) -> ClientError {
    if status == ua::StatusCode::BadNotConnected || status == ua::StatusCode::BadConnectionClosed {
        ClientError::Connection(status.to_string())
    } else {
        ClientError::Request(status.to_string())
    }
}

fn browse_children(session: &SharedSession, node: &NodeId) -> Result<Vec<NodeId>, ClientError> {
    let session = session.read();
    let description = ua::BrowseDescription {
        node_id: to_ua(node),
        browse_direction: ua::BrowseDirection::Forward,
        reference_type_id: ua::ReferenceTypeId::HierarchicalReferences.into(),
        include_subtypes: true,
        node_class_mask: 0,
        result_mask: ua::BrowseDescriptionResultMask::all().bits(),
    };

    let mut children = Vec::new();
    let mut results = session.browse(&[description]).map_err(request_error)?;
    loop {
        let Some(result) = results.and_then(|r| r.into_iter().next()) else {
            break;
        };
        if result.status_code.is_bad() {
            return Err(request_error(result.status_code));
        }
        for reference in result.references.unwrap_or_default() {
            // References into other servers cannot be browsed here.
            if reference.node_id.server_index == 0 {
                children.push(from_ua(&reference.node_id.node_id));
            }
        }
        if result.continuation_point.is_null() {
            break;
        }
        results = session
            .browse_next(false, &[result.continuation_point])
            .map_err(request_error)?;
    }
    Ok(children)
}

fn read_attribute(
    session: &SharedSession,
    node: &NodeId,
    attribute: ua::AttributeId,
) -> Result<ua::Variant, ClientError> {
    let session = session.read();
    let read = ua::ReadValueId {
        node_id: to_ua(node),
        attribute_id: attribute as u32,
        index_range: ua::UAString::null(),
        data_encoding: ua::QualifiedName::null(),
    };
    let value = session
        .read(&[read], ua::TimestampsToReturn::Neither, 0.0)
        .map_err(request_error)?
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::Request(format!("empty read response for {}", node)))?;
    if let Some(status) = value.status {
        if status.is_bad() {
            return Err(request_error(status));
        }
    }
    value
        .value
        .ok_or_else(|| ClientError::Request(format!("no value for {:?} of {}", attribute, node)))
}

fn read_node_class(session: &SharedSession, node: &NodeId) -> Result<NodeClass, ClientError> {
    match read_attribute(session, node, ua::AttributeId::NodeClass)? {
        ua::Variant::Int32(value) => node_class_from_mask(value)
            .ok_or_else(|| {
                ClientError::Request(format!("unknown node class {} for {}", value, node))
            }),
        other => Err(ClientError::Request(format!(
            "unexpected node class value {:?} for {}",
            other, node
        ))),
    }
}

fn read_browse_name(session: &SharedSession, node: &NodeId) -> Result<String, ClientError> {
    match read_attribute(session, node, ua::AttributeId::BrowseName)? {
        ua::Variant::QualifiedName(name) => Ok(name.name.as_ref().to_string()),
        other => Err(ClientError::Request(format!(
            "unexpected browse name value {:?} for {}",
            other, node
        ))),
    }
}

fn read_data_type(session: &SharedSession, node: &NodeId) -> Result<Option<String>, ClientError> {
    match read_attribute(session, node, ua::AttributeId::DataType)? {
        ua::Variant::NodeId(data_type) => Ok(Some(data_type_name(&from_ua(&data_type)))),
        ua::Variant::Empty => Ok(None),
        other => Err(ClientError::Request(format!(
            "unexpected data type value {:?} for {}",
            other, node
        ))),
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn node_class_from_mask(value: i32) -> Option<NodeClass> {
    Some(match value {
        1 => NodeClass::Object,
        2 => NodeClass::Variable,
        4 => NodeClass::Method,
        8 => NodeClass::ObjectType,
        16 => NodeClass::VariableType,
        32 => NodeClass::ReferenceType,
        64 => NodeClass::DataType,
        128 => NodeClass::View,
        _ => return None,
    })
}

/// Name of a built-in data type, or the node id's text for anything else.
fn data_type_name(id: &NodeId) -> String {
    let builtin = match (id.namespace, &id.identifier) {
        (0, NodeIdentifier::Numeric(n)) => match n {
            1 => Some("Boolean"),
            2 => Some("SByte"),
            3 => Some("Byte"),
            4 => Some("Int16"),
            5 => Some("UInt16"),
            6 => Some("Int32"),
            7 => Some("UInt32"),
            8 => Some("Int64"),
            9 => Some("UInt64"),
            10 => Some("Float"),
            11 => Some("Double"),
            12 => Some("String"),
            13 => Some("DateTime"),
            14 => Some("Guid"),
            15 => Some("ByteString"),
            16 => Some("XmlElement"),
            17 => Some("NodeId"),
            19 => Some("StatusCode"),
            20 => Some("QualifiedName"),
            21 => Some("LocalizedText"),
            26 => Some("Number"),
            27 => Some("Integer"),
            28 => Some("UInteger"),
            29 => Some("Enumeration"),
            _ => None,
        },
        _ => None,
    };
    builtin.map(str::to_string).unwrap_or_else(|| id.to_string())
}

fn to_ua(id: &NodeId) -> ua::NodeId {
    let identifier = match &id.identifier {
        NodeIdentifier::Numeric(n) => ua::Identifier::Numeric(*n),
        NodeIdentifier::String(s) => ua::Identifier::String(ua::UAString::from(s.as_str())),
        NodeIdentifier::Guid(g) => ua::Identifier::Guid(ua::Guid::from_bytes(*g.as_bytes())),
        NodeIdentifier::Opaque(b) => ua::Identifier::ByteString(ua::ByteString::from(b.clone())),
    };
    ua::NodeId {
        namespace: id.namespace,
        identifier,
    }
}

fn from_ua(id: &ua::NodeId) -> NodeId {
    let identifier = match &id.identifier {
        ua::Identifier::Numeric(n) => NodeIdentifier::Numeric(*n),
        ua::Identifier::String(s) => NodeIdentifier::String(s.as_ref().to_string()),
        ua::Identifier::Guid(g) => NodeIdentifier::Guid(Uuid::from_bytes(*g.as_bytes())),
        ua::Identifier::ByteString(b) => {
            NodeIdentifier::Opaque(b.value.clone().unwrap_or_default())
        }
    };
    NodeId::new(id.namespace, identifier)
}
