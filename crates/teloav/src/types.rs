//! Core types for TelOAV discovery
//!
//! TelOAV is the **Variable Discovery + Reconciliation** layer.
//! It browses OPC UA servers, flattens their variables into descriptors,
//! and writes them into the `nodes` lists of Telegraf input blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum number of characters of an unexpected error kept in a status.
pub const STATUS_DETAIL_MAX_CHARS: usize = 30;

/// Data type name recorded when a variable's declared type cannot be read.
pub const UNKNOWN_DATA_TYPE: &str = "Unknown";

// ============================================================================
// Remote node identity
// ============================================================================

/// Identifier of a node within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdentifier {
    Numeric(u32),
    String(String),
    Guid(Uuid),
    Opaque(Vec<u8>),
}

/// Fully qualified remote node id: namespace index plus identifier.
///
/// Textual form is `ns=<index>;<i|s|g|b>=<value>` (see `encoder`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: NodeIdentifier,
}

impl NodeId {
    pub fn new(namespace: u16, identifier: NodeIdentifier) -> Self {
        Self {
            namespace,
            identifier,
        }
    }

    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self::new(namespace, NodeIdentifier::Numeric(value))
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self::new(namespace, NodeIdentifier::String(value.into()))
    }

    /// The standard `Objects` folder (ns=0;i=85), root of every walk.
    pub fn objects_folder() -> Self {
        Self::numeric(0, 85)
    }
}

/// Class of a remote node. Only `Variable` nodes become descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

// ============================================================================
// Variable descriptors
// ============================================================================

/// Wire-level identifier scheme tag used by Telegraf's `identifier_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierType {
    #[serde(rename = "s")]
    String,
    #[serde(rename = "i")]
    Numeric,
    #[serde(rename = "g")]
    Guid,
    #[serde(rename = "b")]
    Opaque,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::String => "s",
            IdentifierType::Numeric => "i",
            IdentifierType::Guid => "g",
            IdentifierType::Opaque => "b",
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier value as written into the egress document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentifierValue {
    Numeric(u32),
    Text(String),
}

impl fmt::Display for IdentifierValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierValue::Numeric(value) => write!(f, "{}", value),
            IdentifierValue::Text(value) => f.write_str(value),
        }
    }
}

/// One discovered remote variable.
///
/// Names are not unique within an endpoint, and a variable reachable through
/// several parents appears once per path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Browse name of the variable
    pub name: String,
    /// Namespace index, carried as a decimal string
    pub namespace: String,
    pub identifier_type: IdentifierType,
    pub identifier: IdentifierValue,
    /// Declared data type name, `"Unknown"` when it could not be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl VariableDescriptor {
    /// Render as a Telegraf `nodes` entry. Keys are emitted in Telegraf's
    /// documented order.
    pub fn to_table(&self, include_data_type: bool) -> toml::Table {
        let mut table = toml::Table::new();
        table.insert("name".into(), toml::Value::String(self.name.clone()));
        table.insert(
            "namespace".into(),
            toml::Value::String(self.namespace.clone()),
        );
        table.insert(
            "identifier_type".into(),
            toml::Value::String(self.identifier_type.as_str().to_string()),
        );
        let identifier = match &self.identifier {
            IdentifierValue::Numeric(value) => toml::Value::Integer(i64::from(*value)),
            IdentifierValue::Text(value) => toml::Value::String(value.clone()),
        };
        table.insert("identifier".into(), identifier);
        if include_data_type {
            if let Some(data_type) = &self.data_type {
                table.insert("data_type".into(), toml::Value::String(data_type.clone()));
            }
        }
        table
    }
}

// ============================================================================
// Discovery results
// ============================================================================

/// Outcome of one endpoint's discovery session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Connected,
    ConnectionFailed,
    /// Unexpected failure, detail truncated to [`STATUS_DETAIL_MAX_CHARS`]
    Error(String),
}

impl DiscoveryStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, DiscoveryStatus::Connected)
    }
}

impl fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStatus::Connected => f.write_str("Connected"),
            DiscoveryStatus::ConnectionFailed => f.write_str("Connection Failed"),
            DiscoveryStatus::Error(detail) => write!(f, "Error: {}", detail),
        }
    }
}

/// Per-endpoint result of one cycle. Never carried into the next cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    pub endpoint: String,
    pub status: DiscoveryStatus,
    pub nodes: Vec<VariableDescriptor>,
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryResult {
    pub fn connected(endpoint: impl Into<String>, nodes: Vec<VariableDescriptor>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: DiscoveryStatus::Connected,
            nodes,
            timestamp: Utc::now(),
        }
    }

    pub fn connection_failed(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: DiscoveryStatus::ConnectionFailed,
            nodes: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(endpoint: impl Into<String>, detail: &str) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: DiscoveryStatus::Error(truncate_chars(detail, STATUS_DETAIL_MAX_CHARS)),
            nodes: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// First `max` characters of `text` (char boundary safe).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(
        identifier: IdentifierValue,
        identifier_type: IdentifierType,
    ) -> VariableDescriptor {
        VariableDescriptor {
            name: "Temperature".to_string(),
            namespace: "2".to_string(),
            identifier_type,
            identifier,
            data_type: Some("Double".to_string()),
        }
    }

    #[test]
    fn test_error_status_truncated_to_30_chars() {
        let detail = "BadSecureChannelClosed: the channel was closed by the server";
        let result = DiscoveryResult::error("opc.tcp://a", detail);
        assert_eq!(
            result.status,
            DiscoveryStatus::Error("BadSecureChannelClosed: the ch".to_string())
        );
        assert!(result.nodes.is_empty());
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("Temperatur°C", 11), "Temperatur°");
        assert_eq!(truncate_chars("abc", 30), "abc");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DiscoveryStatus::Connected.to_string(), "Connected");
        assert_eq!(DiscoveryStatus::ConnectionFailed.to_string(), "Connection Failed");
        assert_eq!(
            DiscoveryStatus::Error("boom".to_string()).to_string(),
            "Error: boom"
        );
    }

    #[test]
    fn test_to_table_numeric_identifier_is_integer() {
        let table =
            descriptor(IdentifierValue::Numeric(1001), IdentifierType::Numeric).to_table(false);
        assert_eq!(table.get("identifier"), Some(&toml::Value::Integer(1001)));
        assert_eq!(
            table.get("identifier_type"),
            Some(&toml::Value::String("i".to_string()))
        );
        assert_eq!(
            table.get("namespace"),
            Some(&toml::Value::String("2".to_string()))
        );
        assert!(table.get("data_type").is_none());
    }

    #[test]
    fn test_to_table_key_order_and_data_type() {
        let table = descriptor(
            IdentifierValue::Text("Line1.Temp".to_string()),
            IdentifierType::String,
        )
        .to_table(true);
        let keys: Vec<&str> = table.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["name", "namespace", "identifier_type", "identifier", "data_type"]
        );
    }

    #[test]
    fn test_descriptor_serde_uses_wire_tags() {
        let json = serde_json::to_string(&descriptor(
            IdentifierValue::Numeric(7),
            IdentifierType::Numeric,
        ))
        .unwrap();
        assert!(json.contains(r#""identifier_type":"i""#));
        assert!(json.contains(r#""identifier":7"#));
    }
}
