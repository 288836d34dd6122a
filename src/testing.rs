//! Shared test support: a scripted command runner and a known-good spec
//! input.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    EsflowError, Result,
    model::{DiskType, NodeSpecInput},
    runner::CommandRunner,
};

/// A runner that answers commands from a fixed script. Each rule is a
/// substring pattern plus the canned response; the first matching rule is
/// consumed, so repeated polls of the same endpoint take one rule each.
pub(crate) struct ScriptedRunner {
    rules: Mutex<Vec<(String, Result<String>)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new(rules: Vec<(&str, Result<String>)>) -> Self {
        Self {
            rules: Mutex::new(rules.into_iter().map(|(pattern, res)| (pattern.to_string(), res)).collect()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// every command the runner was asked to execute, in order
    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        cmd: &str,
        _verbose: bool,
    ) -> Result<String> {
        self.commands.lock().unwrap().push(cmd.to_string());

        let mut rules = self.rules.lock().unwrap();
        match rules.iter().position(|(pattern, _)| cmd.contains(pattern.as_str())) {
            Some(idx) => rules.remove(idx).1,
            None => Err(EsflowError::Execution(format!("no scripted response for: {cmd}"))),
        }
    }
}

/// a spec input that passes every validation
pub(crate) fn spec_input() -> NodeSpecInput {
    NodeSpecInput {
        cluster_name: "logs".to_string(),
        dsize: 20,
        dtype: DiskType::PdSsd,
        hsize: 1024,
        image: "gcr.io/my-project/es-node".to_string(),
        mtype: "n1-standard-2".to_string(),
        name: "es-node-1".to_string(),
        service_account: "1234-compute@developer.gserviceaccount.com".to_string(),
        zone: "us-east1-b".to_string(),
        ..Default::default()
    }
}
