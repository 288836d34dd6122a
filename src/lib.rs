//! # Esflow
//!
//! Esflow provisions and maintains single-purpose Elasticsearch container
//! nodes (optionally co-located with a Kibana dashboard) on Google Compute
//! Engine, and orchestrates the multi-stage rollout each node goes through:
//! create or update the instance, wait for Elasticsearch to report a
//! yellow/green cluster, wait for Kibana to answer on its root path, then
//! push index settings/mappings, stored scripts and saved objects to the
//! now-healthy node.
//!
//! ## Core Features
//!
//! - **Observable pipelines**: every rollout stage exposes a one-shot
//!   start/end lifecycle so callers can react to each stage independently
//! - **Async Execution**: powered by `tokio`; pipelines run in the
//!   background while the caller holds the lifecycle bundle
//! - **No external database**: each node's full configuration rides on the
//!   instance itself as a base64 identity blob and is recovered by listing
//!   instances carrying the reserved `esflow` label
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use esflow::{CreateOptions, CreatePayload, NodeSpec, Provisioner};
//!
//! let provisioner = Provisioner::builder().build();
//! let spec = NodeSpec::new(input)?;
//! let payload = CreatePayload::new(CreateOptions::default())?;
//!
//! let tasks = provisioner.create(spec, payload)?;
//! tasks.elastic_ready.on_start().await;
//! let node = tasks.main.on_end().await?;
//! ```

mod config;
mod error;
pub mod gce;
pub mod identity;
mod model;
mod pipeline;
mod probe;
mod provisioner;
mod runner;
mod tasks;
mod utils;

pub use config::Config;
pub use error::EsflowError;
pub use model::*;
pub use pipeline::{NodeCreator, NodeUpdater};
pub use probe::{HealthProbe, Readiness};
pub use provisioner::{Provisioner, ProvisionerBuilder};
pub use runner::{CommandRunner, ShellRunner};
pub use tasks::{CreateTasks, EndTask, FullTask, UpdateTasks};

/// Result type alias for Esflow operations.
pub type Result<T> = std::result::Result<T, EsflowError>;

#[cfg(test)]
pub(crate) mod testing;
