//! Kindling - ephemeral kind clusters for Rust test suites
//!
//! Kindling creates and manages throwaway local Kubernetes clusters
//! (via [kind](https://kind.sigs.k8s.io)) for integration tests. The kind
//! and kubectl binaries are downloaded and cached on first use, so tests
//! need nothing preinstalled beyond Docker.
//!
//! # Example (direct)
//!
//! ```no_run
//! use kindling::KindCluster;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cluster = KindCluster::new("test-cluster");
//!     cluster.create(None).await?;
//!
//!     cluster.kubectl(&["get", "nodes"]).await?;
//!
//!     let pf = cluster.port_forward("service/kube-dns", 53).await?;
//!     println!("tunnel on 127.0.0.1:{}", pf.local_port());
//!     drop(pf);
//!
//!     cluster.delete().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example (test harness)
//!
//! ```ignore
//! use kindling::KindCluster;
//!
//! #[kindling::test]
//! async fn test_nodes_are_ready(cluster: &KindCluster) {
//!     let out = cluster.kubectl(&["get", "nodes"]).await.unwrap();
//!     assert!(out.contains("Ready"));
//! }
//! ```

pub mod binaries;
pub mod cluster;
pub mod command;
pub mod config;
pub mod harness;
pub mod portforward;
pub mod telemetry;

// Re-export commonly used types
pub use binaries::{BinarySpec, BinaryStore, DownloadError, Tool};
pub use cluster::{ClusterError, KindCluster};
pub use command::{CommandError, RunResult};
pub use config::ClusterSettings;
pub use harness::{session_cluster, teardown_session, with_session_cluster, HarnessError};
pub use portforward::{PortForward, PortForwardError, PortForwardOptions};

/// Attribute macro wrapping an async fn into a cluster-backed test.
pub use kindling_macros::test;
