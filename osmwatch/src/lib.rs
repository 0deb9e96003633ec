//! OSMWatch - Anomaly detection for the OpenStreetMap replication feed
//!
//! This library consumes the sequence-numbered minutely replication stream,
//! aggregates edits per changeset, and flags changesets or individual ways
//! that look suspicious: mass deletions, near-mechanical retagging, and
//! degenerate or overly-angular way shapes.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides the full monitor loop:
//!
//! ```ignore
//! use osmwatch::fetch::HttpReplicationClient;
//! use osmwatch::sequencer::FileStateStore;
//! use osmwatch::service::{MonitorConfig, MonitorService};
//!
//! let client = HttpReplicationClient::new(replication_url, lookup_url)?;
//! let store = FileStateStore::new("state.txt");
//! let service = MonitorService::new(client, store, MonitorConfig::default())?;
//!
//! service.run(shutdown_token).await;
//! ```

pub mod analyzer;
pub mod changeset;
pub mod detector;
pub mod fetch;
pub mod geometry;
pub mod logging;
pub mod osc;
pub mod resolver;
pub mod sequencer;
pub mod service;

/// Version of the OSMWatch library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
