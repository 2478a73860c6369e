//! Aggregate the logs of Kubernetes pods selected through resource specifiers.
//!
//! A specifier such as `prod/deploy/web-*` resolves to the pods of every
//! matching controller. Their log streams are read concurrently and merged
//! into a single [`LogIterator`]. In follow mode the membership of each
//! resource is watched and new pods join the stream as they appear.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use podlogs::{AggregateOptions, KubeCluster, aggregate};
//! use std::sync::Arc;
//!
//! let client = kube::Client::try_default().await?;
//! let cluster = Arc::new(KubeCluster::new(client));
//! let mut logs = aggregate(cluster, &["deploy/web"], AggregateOptions::default());
//! while let Some(line) = logs.recv().await {
//!     println!("{}", line?.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod cluster;
pub mod error;
pub mod iterator;
pub mod projection;
pub mod reader;
pub mod resolver;
pub mod retry;
pub mod specifier;
pub mod types;
pub mod utils;

#[cfg(test)]
mod mock;

pub use aggregator::{AggregateOptions, Aggregator, aggregate};
pub use cluster::{ClientError, ClusterApi, KubeCluster};
pub use error::{Error, ErrorKind, Result};
pub use iterator::{LogIterator, Merger, merge};
pub use retry::RetryPolicy;
pub use specifier::ResourceSpecifier;
pub use types::{ControllerKind, LogLine, LogOptions, ResourceKind};
