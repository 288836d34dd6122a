//! The provisioner - the main entry point for Esflow.
//!
//! A `Provisioner` owns the command runner and the runtime configuration
//! and hands out pipelines: full observable create/update rollouts, the
//! bare partial-create used for two-phase cluster bootstraps, and fleet
//! discovery.

use std::sync::Arc;

use crate::{
    Config, Result,
    model::{CreatePayload, Node, NodeSpec, UpdatePayload},
    pipeline::{NodeCreator, NodeUpdater},
    runner::{CommandRunner, ShellRunner},
    tasks::{CreateTasks, UpdateTasks},
};

/// The main provisioning facade.
///
/// # Example
///
/// ```rust,ignore
/// let provisioner = Provisioner::builder().config(config).build();
///
/// let tasks = provisioner.create(spec, payload)?;
/// let node = tasks.main.on_end().await?;
///
/// let fleet = provisioner.discover().await?;
/// ```
pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    config: Config,
}

impl Provisioner {
    pub fn builder() -> ProvisionerBuilder {
        ProvisionerBuilder::new()
    }

    /// Spawn the full create pipeline for `spec`.
    pub fn create(
        &self,
        spec: NodeSpec,
        payload: CreatePayload,
    ) -> Result<CreateTasks> {
        Ok(NodeCreator::new(spec, payload, self.runner.clone())?.verbose(self.config.verbose).create())
    }

    /// Create the instance only; readiness waits and configuration are
    /// deferred to a later update pass.
    pub async fn partial_create(
        &self,
        spec: NodeSpec,
        payload: CreatePayload,
    ) -> Result<Node> {
        NodeCreator::new(spec, payload, self.runner.clone())?.verbose(self.config.verbose).partial_create().await
    }

    /// Spawn the update pipeline for a live node.
    pub fn update(
        &self,
        node: Node,
        payload: UpdatePayload,
    ) -> UpdateTasks {
        NodeUpdater::new(node, payload, self.runner.clone()).verbose(self.config.verbose).update()
    }

    /// Rebuild the fleet from instance metadata.
    pub async fn discover(&self) -> Result<Vec<Node>> {
        Node::fetch_all(self.runner.as_ref(), self.config.verbose).await
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        self.runner.clone()
    }
}

pub struct ProvisionerBuilder {
    config: Config,
    runner: Option<Arc<dyn CommandRunner>>,
}

impl Default for ProvisionerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            runner: None,
        }
    }
}

impl ProvisionerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn runner(
        mut self,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn build(self) -> Provisioner {
        let runner = match self.runner {
            Some(runner) => runner,
            None => Arc::new(ShellRunner::with_shell(&self.config.shell)),
        };
        Provisioner {
            runner,
            config: self.config,
        }
    }
}
