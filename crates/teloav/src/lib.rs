//! TelOAV - OPC UA Variable Discovery for Telegraf
//!
//! Browses OPC UA servers named in a Telegraf configuration, flattens their
//! variables into `nodes` entries and writes an updated configuration only
//! when the discovered set actually changed.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐    ┌────────────┐    ┌────────────┐    ┌────────────┐    ┌────────────┐
//! │  telegraf  │    │  Resolver  │    │  Session   │    │ Reconciler │    │  telegraf  │
//! │   (in)     │───▶│ (endpoints)│───▶│ (walk per  │───▶│  (merge +  │───▶│   (out)    │
//! │            │    │            │    │  endpoint) │    │   diff)    │    │ if changed │
//! └────────────┘    └────────────┘    └────────────┘    └────────────┘    └────────────┘
//! ```
//!
//! The [`Scheduler`] repeats this cycle once or on an interval and hands a
//! [`CycleSnapshot`] to an observer after each pass.
//!
//! # Core Concepts
//!
//! - **Endpoint**: address of one OPC UA server (`opc.tcp://host:port`)
//! - **VariableDescriptor**: one discovered variable, as a Telegraf `nodes` entry
//! - **DiscoveryResult**: per-endpoint status and descriptors for one cycle
//! - **Connector**: the remote client capability the walker needs

pub mod client;
pub mod config;
pub mod document;
pub mod encoder;
pub mod error;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod types;
pub mod walker;

// Re-exports for convenience
pub use client::{Connection, Connector, MemoryAddressSpace, MemoryConnector};
pub use config::ServiceConfig;
pub use document::{ConfigDocument, DocumentFormat};
pub use error::{ClientError, DiscoveryError, Result};
pub use reconciler::{Reconciler, Reconciliation};
pub use resolver::endpoints_from_document;
pub use scheduler::{
    CycleObserver, CycleSnapshot, ReconcileOutcome, RunMode, Scheduler, SchedulerState,
    ShutdownSignal,
};
pub use session::{discover_all, discover_endpoint};
pub use types::{
    DiscoveryResult, DiscoveryStatus, IdentifierType, IdentifierValue, NodeClass, NodeId,
    NodeIdentifier, VariableDescriptor,
};
pub use walker::{AddressSpaceWalker, WalkOptions, WalkStats};
