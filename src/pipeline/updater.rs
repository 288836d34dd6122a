//! The update pipeline.
//!
//! Same shape as create minus instance creation: push the merged env (and
//! the remove-list computed from entries set to null) onto the running
//! instance, re-learn its current internal and external IPs, then run the
//! readiness probes and uploads. Uploads run scripts-then-settings here,
//! the reverse of the create pipeline.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use crate::{
    EsflowError, Result,
    model::{Node, UpdatePayload},
    pipeline::uploader,
    runner::CommandRunner,
    tasks::UpdateTasks,
    utils,
};

pub struct NodeUpdater {
    node: Node,
    payload: UpdatePayload,
    runner: Arc<dyn CommandRunner>,
    verbose: bool,
}

impl NodeUpdater {
    pub fn new(
        node: Node,
        payload: UpdatePayload,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let verbose = payload.verbose();
        Self {
            node,
            payload,
            runner,
            verbose,
        }
    }

    /// raise the effective verbosity, e.g. from a provisioner-wide config
    pub fn verbose(
        mut self,
        verbose: bool,
    ) -> Self {
        self.verbose = self.verbose || verbose;
        self
    }

    /// Kick off the update pipeline; the mutated node arrives through the
    /// main lifecycle.
    pub fn update(self) -> UpdateTasks {
        let tasks = UpdateTasks::new();

        let stages = tasks.clone();
        tokio::spawn(async move {
            match self.drive(&stages).await {
                Ok(node) => stages.main.end_ok(node),
                Err(err) => stages.main.end_err(err),
            }
        });

        tasks
    }

    async fn drive(
        mut self,
        tasks: &UpdateTasks,
    ) -> Result<Node> {
        let node = tasks.node_update.run(self.update_instance()).await?;

        tasks
            .elastic_ready
            .run(node.wait_for_elastic(self.runner.as_ref(), self.payload.interval(), self.verbose))
            .await?;

        tasks
            .kibana_ready
            .run(async {
                if node.spec().kibana() {
                    node.wait_for_kibana(self.runner.as_ref(), self.payload.interval(), self.verbose).await?;
                }
                Ok(())
            })
            .await?;

        tasks
            .scripts_upload
            .run(uploader::upload_scripts(self.runner.clone(), &node, self.payload.scripts(), self.verbose))
            .await?;

        tasks
            .sm_upload
            .run(uploader::upload_sm(self.runner.clone(), &node, self.payload.sm(), self.verbose))
            .await?;

        Ok(node)
    }

    async fn update_instance(&mut self) -> Result<Node> {
        let env_file = self.write_env_file()?;
        let cmd = self.update_cmd(&env_file);

        if self.verbose {
            info!("updating node {} with the following command:\n\n{cmd}", self.node.spec().name());
        }

        let res = self.runner.run(&cmd, self.verbose).await;
        // the env file must not outlive the call, success or not
        let _ = fs::remove_file(&env_file);
        let out = res?;

        let descriptor: serde_json::Value = serde_json::from_str(&out)?;
        let ip = descriptor["networkInterfaces"][0]["networkIP"]
            .as_str()
            .ok_or_else(|| EsflowError::Convert("update response has no internal ip".to_string()))?;
        let eip = descriptor["networkInterfaces"][0]["accessConfigs"][0]["natIP"]
            .as_str()
            .ok_or_else(|| EsflowError::Convert("update response has no external ip".to_string()))?;

        self.node.set_ips(ip, eip)?;
        Ok(self.node.clone())
    }

    fn update_cmd(
        &self,
        env_file: &Path,
    ) -> String {
        let to_remove = self.node.spec().env_to_remove();
        let remove_flag = if to_remove.is_empty() {
            String::new()
        } else {
            format!(" --remove-container-env={}", to_remove.join(","))
        };

        format!(
            "gcloud beta compute instances update-container {} --format=json --zone {} --container-env-file={}{remove_flag}",
            self.node.spec().name(),
            self.node.spec().zone(),
            env_file.display()
        )
    }

    fn write_env_file(&self) -> Result<PathBuf> {
        let env = self.node.spec().merged_env()?;
        let path = std::env::temp_dir().join(format!("esflow-{}.env", utils::longid()));
        let content = env.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("\n");
        fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeMap, sync::Mutex};

    use futures::future::BoxFuture;
    use serde_json::json;

    use super::*;
    use crate::{
        model::{NodeSpec, UpdateOptions},
        testing::{ScriptedRunner, spec_input},
    };

    fn update_descriptor() -> String {
        serde_json::to_string(&json!({
            "networkInterfaces": [{
                "networkIP": "10.0.0.12",
                "accessConfigs": [{"natIP": "34.73.0.7"}]
            }]
        }))
        .unwrap()
    }

    fn plain_node() -> Node {
        Node::new(NodeSpec::new(spec_input()).unwrap(), "10.0.0.9", 1).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_removes_null_env_keys() {
        let mut node = plain_node();
        let mut env = BTreeMap::new();
        env.insert("x".to_string(), serde_json::Value::Null);
        node.spec_mut().set_env(env).unwrap();

        let runner = Arc::new(ScriptedRunner::new(vec![
            ("update-container", Ok(update_descriptor())),
            ("_cluster/health", Ok(r#"{"status":"green"}"#.to_string())),
        ]));

        let payload = UpdatePayload::new(UpdateOptions::default()).unwrap();
        let tasks = NodeUpdater::new(node, payload, runner.clone()).update();

        let node = tasks.main.on_end().await.unwrap();
        assert_eq!(node.ip(), "10.0.0.12");
        assert_eq!(node.eip(), Some("34.73.0.7"));

        let update_cmd = &runner.commands()[0];
        assert!(update_cmd.contains("--remove-container-env=x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_stage_order_is_scripts_then_sm() {
        let node = plain_node();

        let runner = Arc::new(ScriptedRunner::new(vec![
            ("update-container", Ok(update_descriptor())),
            ("_cluster/health", Ok(r#"{"status":"yellow"}"#.to_string())),
        ]));

        let payload = UpdatePayload::new(UpdateOptions::default()).unwrap();
        let tasks = NodeUpdater::new(node, payload, runner).update();

        let order = Arc::new(Mutex::new(Vec::new()));
        let watch = |name: &'static str, started: BoxFuture<'static, ()>| {
            let order = order.clone();
            tokio::spawn(async move {
                started.await;
                order.lock().unwrap().push(name);
            });
        };
        watch("node_update", tasks.node_update.on_start());
        watch("scripts_upload", tasks.scripts_upload.on_start());
        watch("sm_upload", tasks.sm_upload.on_start());

        tasks.main.on_end().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["node_update", "scripts_upload", "sm_upload"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_failure_fails_the_stage_and_main() {
        let node = plain_node();

        let runner = Arc::new(ScriptedRunner::new(vec![(
            "update-container",
            Err(EsflowError::Execution("instance not found".to_string())),
        )]));

        let payload = UpdatePayload::new(UpdateOptions::default()).unwrap();
        let tasks = NodeUpdater::new(node, payload, runner).update();

        let stage_end = tasks.node_update.on_end();
        let main_end = tasks.main.on_end();

        assert_eq!(stage_end.await, Err(EsflowError::Execution("instance not found".to_string())));
        assert_eq!(main_end.await, Err(EsflowError::Execution("instance not found".to_string())));
    }
}
