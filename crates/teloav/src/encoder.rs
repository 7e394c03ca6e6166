//! Identifier scheme encoding
//!
//! Maps remote node identifiers onto the single-character `identifier_type`
//! tags Telegraf uses to rebuild node ids (`s`, `i`, `g`, `b`), and provides
//! the textual `ns=<n>;<tag>=<value>` node id form.

use crate::types::{IdentifierType, IdentifierValue, NodeId, NodeIdentifier};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Classify an identifier into its wire-type tag. Total over every kind.
pub fn identifier_type(identifier: &NodeIdentifier) -> IdentifierType {
    match identifier {
        NodeIdentifier::Guid(_) => IdentifierType::Guid,
        NodeIdentifier::Numeric(_) => IdentifierType::Numeric,
        NodeIdentifier::String(_) => IdentifierType::String,
        NodeIdentifier::Opaque(_) => IdentifierType::Opaque,
    }
}

/// Identifier value as Telegraf expects it next to its tag.
pub fn identifier_value(identifier: &NodeIdentifier) -> IdentifierValue {
    match identifier {
        NodeIdentifier::Numeric(value) => IdentifierValue::Numeric(*value),
        NodeIdentifier::String(value) => IdentifierValue::Text(value.clone()),
        NodeIdentifier::Guid(value) => IdentifierValue::Text(value.hyphenated().to_string()),
        NodeIdentifier::Opaque(bytes) => IdentifierValue::Text(BASE64.encode(bytes)),
    }
}

/// Tag and value together.
pub fn encode(identifier: &NodeIdentifier) -> (IdentifierType, IdentifierValue) {
    (identifier_type(identifier), identifier_value(identifier))
}

/// Error returned when parsing a textual node id fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdParseError {
    message: String,
}

impl NodeIdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for NodeIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for NodeIdParseError {}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = identifier_type(&self.identifier);
        let value = identifier_value(&self.identifier);
        write!(f, "ns={};{}={}", self.namespace, tag, value)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or_else(|| {
                        NodeIdParseError::new(format!("Invalid node id '{}': missing ';'", s))
                    })?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|e| {
                        NodeIdParseError::new(format!("Invalid namespace in '{}': {}", s, e))
                    })?;
                (ns, rest)
            }
            None => (0, s),
        };

        let (tag, value) = rest
            .split_once('=')
            .ok_or_else(|| {
                NodeIdParseError::new(format!("Invalid node id '{}': missing identifier", s))
            })?;

        let identifier = match tag {
            "i" => NodeIdentifier::Numeric(
                value
                    .parse()
                    .map_err(|e| {
                        NodeIdParseError::new(format!("Invalid numeric id in '{}': {}", s, e))
                    })?,
            ),
            "s" => NodeIdentifier::String(value.to_string()),
            "g" => NodeIdentifier::Guid(
                Uuid::parse_str(value)
                    .map_err(|e| NodeIdParseError::new(format!("Invalid GUID in '{}': {}", s, e)))?,
            ),
            "b" => NodeIdentifier::Opaque(
                BASE64
                    .decode(value)
                    .map_err(|e| {
                        NodeIdParseError::new(format!("Invalid opaque id in '{}': {}", s, e))
                    })?,
            ),
            other => {
                return Err(NodeIdParseError::new(format!(
                    "Unknown identifier type '{}' in '{}'",
                    other, s
                )))
            }
        };

        Ok(NodeId::new(namespace, identifier))
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.to_string()
    }
}
