//! End-to-end tests for TelOAV discovery
//!
//! Each test drives full cycles (ingest file -> discovery -> egress file)
//! through the scheduler against in-memory address spaces.

use std::fs;
use std::path::PathBuf;
use teloav::client::{MemoryAddressSpace, MemoryConnector};
use teloav::document::NODES_KEY;
use teloav::{
    ConfigDocument, CycleSnapshot, DiscoveryStatus, NodeId, Scheduler, ServiceConfig,
    ShutdownSignal,
};
use tempfile::TempDir;

/// Create a test environment with ingest and egress paths in a temp dir
struct TestEnv {
    /// Temp directory (cleaned up on drop)
    _temp: TempDir,
    pub ingest: PathBuf,
    pub egress: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        Self::with_names("telegraf.conf", "telegraf.out.conf")
    }

    fn with_names(ingest: &str, egress: &str) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let ingest = temp.path().join(ingest);
        let egress = temp.path().join(egress);
        Self {
            _temp: temp,
            ingest,
            egress,
        }
    }

    fn write_ingest(&self, content: &str) {
        fs::write(&self.ingest, content).expect("Failed to write ingest");
    }

    fn config(&self) -> ServiceConfig {
        ServiceConfig {
            telegraf_config_path_in: self.ingest.clone(),
            telegraf_config_path_out: self.egress.clone(),
            ..ServiceConfig::default()
        }
    }

    fn scheduler(&self, connector: MemoryConnector) -> Scheduler<MemoryConnector> {
        Scheduler::new(self.config(), connector, ShutdownSignal::new())
    }

    fn egress_doc(&self) -> ConfigDocument {
        ConfigDocument::load(&self.egress).expect("Failed to load egress")
    }

    fn egress_nodes(&self, kind: &str, index: usize) -> Vec<toml::Value> {
        self.egress_doc()
            .block(kind, index)
            .and_then(|b| b.get(NODES_KEY))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }
}

fn space_with(names: &[&str]) -> MemoryAddressSpace {
    let root = NodeId::objects_folder();
    let line = NodeId::string(2, "Line1");
    let mut space = MemoryAddressSpace::new();
    space.add_object(&root, line.clone(), "Line1");
    for name in names {
        let id = NodeId::string(2, format!("Line1.{}", name));
        space.add_variable(&line, id, name, Some("Double"));
    }
    space
}

const SINGLE: &str = r#"
[agent]
interval = "10s"

[[inputs.opcua]]
name = "line1"
endpoint = "opc.tcp://a"
connect_timeout = "10s"
"#;

// ============================================================================
// Reconciliation scenarios
// ============================================================================

#[tokio::test]
async fn test_first_run_writes_discovered_nodes() {
    let env = TestEnv::new();
    env.write_ingest(SINGLE);
    let mut scheduler = env.scheduler(
        MemoryConnector::new().with_endpoint("opc.tcp://a", space_with(&["Temp", "Pressure"])),
    );

    let snapshot = scheduler.run_cycle().await;
    let outcome = snapshot.outcome.expect("cycle should reconcile");
    assert!(outcome.changed);
    assert!(outcome.written);
    assert_eq!(outcome.updated_blocks, 1);

    let nodes = env.egress_nodes("opcua", 0);
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].get("name").and_then(|v| v.as_str()), Some("Temp"));
    assert_eq!(nodes[0].get("namespace").and_then(|v| v.as_str()), Some("2"));
    assert_eq!(nodes[0].get("identifier_type").and_then(|v| v.as_str()), Some("s"));
    assert_eq!(
        nodes[0].get("identifier").and_then(|v| v.as_str()),
        Some("Line1.Temp")
    );
}

#[tokio::test]
async fn test_identical_second_run_does_not_write() {
    let env = TestEnv::new();
    env.write_ingest(SINGLE);
    let mut scheduler = env.scheduler(
        MemoryConnector::new().with_endpoint("opc.tcp://a", space_with(&["Temp", "Pressure"])),
    );
    scheduler.run_cycle().await;

    // A comment does not change the parsed document; it only survives if the
    // file is left alone.
    let marked = format!("# operator note\n{}", fs::read_to_string(&env.egress).unwrap());
    fs::write(&env.egress, &marked).unwrap();

    let outcome = scheduler.run_cycle().await.outcome.unwrap();
    assert!(!outcome.changed);
    assert!(!outcome.written);
    assert_eq!(fs::read_to_string(&env.egress).unwrap(), marked);
}

#[tokio::test]
async fn test_failed_discovery_keeps_previous_nodes() {
    let env = TestEnv::new();
    env.write_ingest(SINGLE);
    let five = ["T1", "T2", "T3", "T4", "T5"];
    env.scheduler(MemoryConnector::new().with_endpoint("opc.tcp://a", space_with(&five)))
        .run_cycle()
        .await;
    assert_eq!(env.egress_nodes("opcua", 0).len(), 5);

    // Server gone: connection fails, discovery is empty.
    let snapshot = env.scheduler(MemoryConnector::new()).run_cycle().await;
    assert_eq!(snapshot.results[0].status, DiscoveryStatus::ConnectionFailed);
    let outcome = snapshot.outcome.unwrap();
    assert!(!outcome.changed);
    assert!(!outcome.written);
    assert_eq!(env.egress_nodes("opcua", 0).len(), 5);
}

#[tokio::test]
async fn test_unreachable_endpoint_does_not_block_others() {
    let env = TestEnv::new();
    env.write_ingest(
        r#"
[[inputs.opcua]]
endpoint = "opc.tcp://a"

[[inputs.opcua_listener]]
endpoint = "opc.tcp://b"
"#,
    );
    let mut scheduler = env.scheduler(
        MemoryConnector::new().with_endpoint("opc.tcp://b", space_with(&["Speed"])),
    );

    let snapshot = scheduler.run_cycle().await;
    let statuses: Vec<_> = snapshot.results.iter().map(|r| r.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![DiscoveryStatus::ConnectionFailed, DiscoveryStatus::Connected]
    );
    assert!(snapshot.outcome.unwrap().written);
    assert!(env.egress_nodes("opcua", 0).is_empty());
    assert_eq!(env.egress_nodes("opcua_listener", 0).len(), 1);
}

#[tokio::test]
async fn test_unrelated_content_survives() {
    let env = TestEnv::new();
    env.write_ingest(
        r#"
[global_tags]
site = "plant-7"

[agent]
interval = "10s"

[[inputs.cpu]]
percpu = true

[[inputs.opcua]]
name = "line1"
endpoint = "opc.tcp://a"
security_policy = "None"

[[outputs.influxdb_v2]]
urls = ["http://influx:8086"]
"#,
    );
    env.scheduler(MemoryConnector::new().with_endpoint("opc.tcp://a", space_with(&["Temp"])))
        .run_cycle()
        .await;

    let doc = env.egress_doc();
    let top: Vec<&str> = doc.table().keys().map(|k| k.as_str()).collect();
    assert_eq!(top, vec!["global_tags", "agent", "inputs", "outputs"]);
    let block = doc.block("opcua", 0).unwrap();
    let keys: Vec<&str> = block.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["name", "endpoint", "security_policy", "nodes"]);
    assert_eq!(
        doc.table()["global_tags"]["site"].as_str(),
        Some("plant-7")
    );
}

#[tokio::test]
async fn test_missing_endpoint_aborts_cycle_without_writing() {
    let env = TestEnv::new();
    env.write_ingest("[[inputs.opcua]]\nname = \"nameless\"\n");
    let snapshot = env.scheduler(MemoryConnector::new()).run_cycle().await;
    let reason = snapshot.aborted.expect("cycle should abort");
    assert!(reason.contains("endpoint"));
    assert!(!env.egress.exists());
}

#[tokio::test]
async fn test_broken_branch_still_yields_siblings() {
    let env = TestEnv::new();
    env.write_ingest(SINGLE);
    let mut space = space_with(&["Temp", "Pressure"]);
    let root = NodeId::objects_folder();
    space
        .add_object(&root, NodeId::string(2, "Line2"), "Line2")
        .add_variable(&NodeId::string(2, "Line2"), NodeId::numeric(2, 7), "Flow", Some("Float"))
        .fail_children(NodeId::string(2, "Line1"));

    env.scheduler(MemoryConnector::new().with_endpoint("opc.tcp://a", space))
        .run_cycle()
        .await;

    let nodes = env.egress_nodes("opcua", 0);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].get("identifier"), Some(&toml::Value::Integer(7)));
}

// ============================================================================
// Formats and snapshots
// ============================================================================

#[tokio::test]
async fn test_json_ingest_and_egress() {
    let env = TestEnv::with_names("telegraf.json", "telegraf.out.json");
    env.write_ingest(r#"{"inputs": {"opcua": [{"endpoint": "opc.tcp://a", "name": "line1"}]}}"#);
    env.scheduler(MemoryConnector::new().with_endpoint("opc.tcp://a", space_with(&["Temp"])))
        .run_cycle()
        .await;

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&env.egress).unwrap()).unwrap();
    assert_eq!(written["inputs"]["opcua"][0]["nodes"][0]["name"], "Temp");
    assert_eq!(written["inputs"]["opcua"][0]["name"], "line1");
}

#[tokio::test]
async fn test_snapshot_connector_dry_run() {
    let env = TestEnv::new();
    env.write_ingest(SINGLE);
    let snapshot_path = env.ingest.with_file_name("space.json");
    fs::write(
        &snapshot_path,
        r#"{
            "opc.tcp://a": {
                "id": "ns=0;i=85", "class": "object", "browse_name": "Objects",
                "children": [
                    { "id": "ns=0;i=2253", "class": "object", "browse_name": "Server",
                      "children": [
                        { "id": "ns=0;i=2258", "class": "variable", "browse_name": "CurrentTime" }
                      ] },
                    { "id": "ns=3;g=72962b91-fa75-4ae6-8d28-b404dc7daf63", "class": "variable",
                      "browse_name": "BatchId", "data_type": "Guid" },
                    { "id": "ns=3;b=YWJj", "class": "variable", "browse_name": "Blob" }
                ]
            }
        }"#,
    )
    .unwrap();

    let connector = MemoryConnector::load_snapshot(&snapshot_path).unwrap();
    let mut snapshots: Vec<CycleSnapshot> = Vec::new();
    env.scheduler(connector)
        .run(&mut |s: CycleSnapshot| snapshots.push(s))
        .await;

    assert_eq!(snapshots.len(), 1);
    let nodes = env.egress_nodes("opcua", 0);
    let tags: Vec<&str> = nodes
        .iter()
        .filter_map(|n| n.get("identifier_type").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(tags, vec!["g", "b"]);
    assert_eq!(
        nodes[0].get("identifier").and_then(|v| v.as_str()),
        Some("72962b91-fa75-4ae6-8d28-b404dc7daf63")
    );
    assert_eq!(nodes[1].get("identifier").and_then(|v| v.as_str()), Some("YWJj"));
}

#[tokio::test]
async fn test_bundled_demo_configuration() {
    let demos = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos");
    let env = TestEnv::new();
    fs::copy(demos.join("telegraf.conf"), &env.ingest).unwrap();
    let connector = MemoryConnector::load_snapshot(&demos.join("address_space.json")).unwrap();

    let snapshot = env.scheduler(connector).run_cycle().await;
    assert_eq!(snapshot.results.len(), 2);
    assert_eq!(snapshot.outcome.unwrap().updated_blocks, 2);

    let boiler: Vec<String> = env
        .egress_nodes("opcua", 0)
        .iter()
        .filter_map(|n| n.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    assert_eq!(boiler, vec!["Temperature", "Pressure", "BatchId"]);
    let packer: Vec<String> = env
        .egress_nodes("opcua_listener", 0)
        .iter()
        .filter_map(|n| n.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    assert_eq!(packer, vec!["Speed", "EURange", "Count"]);
}
