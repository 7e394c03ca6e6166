//! Ingest and egress documents
//!
//! Telegraf configuration is held as an order-preserving [`toml::Table`], so
//! keys the service does not own survive a read/write cycle in their original
//! order. JSON documents are converted into the same table form.
//!
//! Shape the service cares about:
//!
//! ```toml
//! [[inputs.opcua]]
//! endpoint = "opc.tcp://plc-1:4840"
//! nodes = [ { name = "Temp", namespace = "2", identifier_type = "s", identifier = "Boiler.Temp" } ]
//! ```

use crate::error::{DiscoveryError, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Input kinds whose blocks are discovered and reconciled.
pub const INPUT_KINDS: [&str; 2] = ["opcua", "opcua_listener"];

pub const INPUTS_KEY: &str = "inputs";
pub const ENDPOINT_KEY: &str = "endpoint";
pub const NODES_KEY: &str = "nodes";

pub fn is_input_kind(kind: &str) -> bool {
    INPUT_KINDS.contains(&kind)
}

/// On-disk encoding, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    /// `.json` is JSON, anything else is TOML (Telegraf uses `.conf`).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Toml,
        }
    }
}

/// Position of one recognized input block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRef<'a> {
    pub kind: &'a str,
    pub index: usize,
    pub block: &'a toml::Table,
}

impl<'a> BlockRef<'a> {
    /// The block's `endpoint`, if it is a string.
    pub fn endpoint(&self) -> Option<&'a str> {
        self.block.get(ENDPOINT_KEY).and_then(|v| v.as_str())
    }
}

/// A parsed Telegraf configuration document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    table: toml::Table,
}

impl From<toml::Table> for ConfigDocument {
    fn from(table: toml::Table) -> Self {
        Self { table }
    }
}

impl ConfigDocument {
    pub fn table(&self) -> &toml::Table {
        &self.table
    }

    pub fn from_bytes(bytes: &[u8], format: DocumentFormat) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            DiscoveryError::InvalidDocument(format!("document is not valid UTF-8: {}", e))
        })?;
        Self::parse(text, format)
    }

    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        match format {
            DocumentFormat::Toml => Ok(Self {
                table: text.parse::<toml::Table>()?,
            }),
            DocumentFormat::Json => {
                let value: serde_json::Value = serde_json::from_str(text)?;
                match json_to_toml(value)? {
                    toml::Value::Table(table) => Ok(Self { table }),
                    other => Err(DiscoveryError::InvalidDocument(format!(
                        "top level must be an object, found {}",
                        other.type_str()
                    ))),
                }
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, DocumentFormat::from_path(path))
    }

    /// Like [`load`](Self::load), but a missing file is `Ok(None)`.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Self::from_bytes(&bytes, DocumentFormat::from_path(path)).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String> {
        match format {
            DocumentFormat::Toml => Ok(toml::to_string_pretty(&self.table)?),
            DocumentFormat::Json => {
                let value = toml_to_json(&toml::Value::Table(self.table.clone()));
                let mut text = serde_json::to_string_pretty(&value)?;
                text.push('\n');
                Ok(text)
            }
        }
    }

    /// Render in the format implied by `path` and replace the file atomically.
    ///
    /// The new content goes to a temporary file in the destination directory
    /// which is then renamed over `path`, so readers never see a partial file.
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        let content = self.render(DocumentFormat::from_path(path))?;
        let persist_err = |source: io::Error| DiscoveryError::Persist {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(persist_err)?;
        file.write_all(content.as_bytes()).map_err(persist_err)?;
        file.as_file().sync_all().map_err(persist_err)?;
        file.persist(path).map_err(|e| persist_err(e.error))?;
        Ok(())
    }

    /// Recognized input blocks in document order.
    ///
    /// A missing `inputs` table yields no blocks. Recognized kinds that are
    /// not arrays of tables make the document invalid; unrecognized kinds
    /// are never inspected.
    pub fn input_blocks(&self) -> Result<Vec<BlockRef<'_>>> {
        let inputs = match self.table.get(INPUTS_KEY) {
            None => return Ok(Vec::new()),
            Some(toml::Value::Table(inputs)) => inputs,
            Some(other) => {
                return Err(DiscoveryError::InvalidDocument(format!(
                    "'{}' must be a table, found {}",
                    INPUTS_KEY,
                    other.type_str()
                )))
            }
        };

        let mut blocks = Vec::new();
        for (kind, value) in inputs.iter().filter(|(k, _)| is_input_kind(k)) {
            let entries = value.as_array().ok_or_else(|| {
                DiscoveryError::InvalidDocument(format!(
                    "'{}.{}' must be an array of tables, found {}",
                    INPUTS_KEY,
                    kind,
                    value.type_str()
                ))
            })?;
            for (index, entry) in entries.iter().enumerate() {
                let block = entry.as_table().ok_or_else(|| {
                    DiscoveryError::InvalidDocument(format!(
                        "'{}.{}' block {} must be a table, found {}",
                        INPUTS_KEY,
                        kind,
                        index,
                        entry.type_str()
                    ))
                })?;
                blocks.push(BlockRef {
                    kind: kind.as_str(),
                    index,
                    block,
                });
            }
        }
        Ok(blocks)
    }

    pub fn block(&self, kind: &str, index: usize) -> Option<&toml::Table> {
        self.table
            .get(INPUTS_KEY)?
            .as_table()?
            .get(kind)?
            .as_array()?
            .get(index)?
            .as_table()
    }

    pub fn block_mut(&mut self, kind: &str, index: usize) -> Option<&mut toml::Table> {
        self.table
            .get_mut(INPUTS_KEY)?
            .as_table_mut()?
            .get_mut(kind)?
            .as_array_mut()?
            .get_mut(index)?
            .as_table_mut()
    }
}

/// Copy the ingest file verbatim over the egress path.
pub fn seed_egress(ingest: &Path, egress: &Path) -> Result<()> {
    let bytes = fs::read(ingest)?;
    let dir = match egress.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let persist_err = |source: io::Error| DiscoveryError::Persist {
        path: egress.to_path_buf(),
        source,
    };
    let mut file = NamedTempFile::new_in(dir).map_err(persist_err)?;
    file.write_all(&bytes).map_err(persist_err)?;
    file.persist(egress).map_err(|e| persist_err(e.error))?;
    Ok(())
}

// ============================================================================
// JSON <-> TOML value conversion
// ============================================================================

fn json_to_toml(value: serde_json::Value) -> Result<toml::Value> {
    use serde_json::Value as J;
    Ok(match value {
        J::Null => {
            return Err(DiscoveryError::InvalidDocument(
                "null values cannot be represented".to_string(),
            ))
        }
        J::Bool(b) => toml::Value::Boolean(b),
        J::Number(n) => match n.as_i64() {
            Some(i) => toml::Value::Integer(i),
            None => match n.as_f64() {
                Some(f) => toml::Value::Float(f),
                None => {
                    return Err(DiscoveryError::InvalidDocument(format!(
                        "number {} is out of range",
                        n
                    )))
                }
            },
        },
        J::String(s) => toml::Value::String(s),
        J::Array(items) => toml::Value::Array(
            items
                .into_iter()
                .map(json_to_toml)
                .collect::<Result<Vec<_>>>()?,
        ),
        J::Object(map) => {
            let mut table = toml::Table::new();
            for (key, item) in map {
                table.insert(key, json_to_toml(item)?);
            }
            toml::Value::Table(table)
        }
    })
}

fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        toml::Value::String(s) => J::String(s.clone()),
        toml::Value::Integer(i) => J::from(*i),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(J::Number)
            .unwrap_or(J::Null),
        toml::Value::Boolean(b) => J::Bool(*b),
        toml::Value::Datetime(dt) => J::String(dt.to_string()),
        toml::Value::Array(items) => J::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => J::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TELEGRAF: &str = r#"
[agent]
interval = "10s"
flush_interval = "10s"

[[inputs.cpu]]
percpu = true

[[inputs.opcua]]
name = "line1"
endpoint = "opc.tcp://plc-1:4840"
security_policy = "None"

[[inputs.opcua_listener]]
endpoint = "opc.tcp://plc-2:4840"

[[outputs.file]]
files = ["stdout"]
"#;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("telegraf.conf")), DocumentFormat::Toml);
        assert_eq!(DocumentFormat::from_path(Path::new("telegraf.toml")), DocumentFormat::Toml);
        assert_eq!(DocumentFormat::from_path(Path::new("cfg/telegraf.JSON")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("telegraf")), DocumentFormat::Toml);
    }

    #[test]
    fn test_input_blocks_in_document_order() {
        let doc = ConfigDocument::parse(TELEGRAF, DocumentFormat::Toml).unwrap();
        let blocks = doc.input_blocks().unwrap();
        let seen: Vec<(&str, usize, Option<&str>)> =
            blocks.iter().map(|b| (b.kind, b.index, b.endpoint())).collect();
        assert_eq!(
            seen,
            vec![
                ("opcua", 0, Some("opc.tcp://plc-1:4840")),
                ("opcua_listener", 0, Some("opc.tcp://plc-2:4840")),
            ]
        );
        assert_eq!(
            blocks[0],
            BlockRef {
                kind: "opcua",
                index: 0,
                block: doc.block("opcua", 0).unwrap(),
            }
        );
    }

    #[test]
    fn test_unrelated_keys_keep_their_order() {
        let doc = ConfigDocument::parse(TELEGRAF, DocumentFormat::Toml).unwrap();
        let rendered = doc.render(DocumentFormat::Toml).unwrap();
        let reparsed = ConfigDocument::parse(&rendered, DocumentFormat::Toml).unwrap();
        assert_eq!(reparsed, doc);

        let top: Vec<&str> = reparsed.table().keys().map(|k| k.as_str()).collect();
        assert_eq!(top, vec!["agent", "inputs", "outputs"]);
        let block = reparsed.block("opcua", 0).unwrap();
        let keys: Vec<&str> = block.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["name", "endpoint", "security_policy"]);
    }

    #[test]
    fn test_recognized_kind_must_be_array_of_tables() {
        let doc =
            ConfigDocument::parse("[inputs]\nopcua = \"oops\"\n", DocumentFormat::Toml).unwrap();
        assert!(matches!(doc.input_blocks(), Err(DiscoveryError::InvalidDocument(_))));

        let doc =
            ConfigDocument::parse("[inputs]\nopcua = [1, 2]\n", DocumentFormat::Toml).unwrap();
        assert!(matches!(doc.input_blocks(), Err(DiscoveryError::InvalidDocument(_))));
    }

    #[test]
    fn test_unrecognized_kinds_are_not_inspected() {
        let text = "[inputs]\nmodbus = \"whatever\"\n";
        let doc = ConfigDocument::parse(text, DocumentFormat::Toml).unwrap();
        assert!(doc.input_blocks().unwrap().is_empty());
        assert!(ConfigDocument::default().input_blocks().unwrap().is_empty());
    }

    #[test]
    fn test_json_documents() {
        let json = r#"{"inputs": {"opcua": [{"endpoint": "opc.tcp://a", "interval": 10}]}}"#;
        let doc = ConfigDocument::parse(json, DocumentFormat::Json).unwrap();
        let block = doc.block("opcua", 0).unwrap();
        assert_eq!(block.get("interval"), Some(&toml::Value::Integer(10)));

        let rendered = doc.render(DocumentFormat::Json).unwrap();
        assert_eq!(ConfigDocument::parse(&rendered, DocumentFormat::Json).unwrap(), doc);
    }

    #[test]
    fn test_json_null_and_non_object_rejected() {
        assert!(matches!(
            ConfigDocument::parse(r#"{"inputs": null}"#, DocumentFormat::Json),
            Err(DiscoveryError::InvalidDocument(_))
        ));
        assert!(matches!(
            ConfigDocument::parse("[1]", DocumentFormat::Json),
            Err(DiscoveryError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            ConfigDocument::parse("[[inputs.opcua]\nendpoint =", DocumentFormat::Toml),
            Err(DiscoveryError::TomlParse(_))
        ));
    }

    #[test]
    fn test_load_optional_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(ConfigDocument::load_optional(&temp.path().join("absent.conf"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_save_atomic_replaces_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("telegraf.out.conf");
        fs::write(&path, "stale = true\n").unwrap();

        let doc = ConfigDocument::parse(TELEGRAF, DocumentFormat::Toml).unwrap();
        doc.save_atomic(&path).unwrap();

        assert_eq!(ConfigDocument::load(&path).unwrap(), doc);
        let leftovers = fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_save_into_missing_directory_is_persist_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing").join("out.conf");
        let err = ConfigDocument::default().save_atomic(&path).unwrap_err();
        assert!(matches!(err, DiscoveryError::Persist { .. }));
    }

    #[test]
    fn test_seed_egress_copies_bytes() {
        let temp = TempDir::new().unwrap();
        let ingest = temp.path().join("in.conf");
        let egress = temp.path().join("out.conf");
        fs::write(&ingest, TELEGRAF).unwrap();
        seed_egress(&ingest, &egress).unwrap();
        assert_eq!(fs::read_to_string(&egress).unwrap(), TELEGRAF);
    }
}
