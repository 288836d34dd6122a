//! The create pipeline.
//!
//! `NodeCreator::create` hands the caller a lifecycle bundle immediately
//! and drives the rollout in a background task: create the instance, wait
//! for elasticsearch, wait for kibana when the node carries that role,
//! then upload settings/mappings, scripts and saved objects. A stage
//! failure ends that stage's lifecycle in error and short-circuits the
//! rest; the main lifecycle always reports the pipeline's outcome.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use crate::{
    EsflowError, Result,
    model::{CreatePayload, KIBANA_PASSWORD_DIR, KIBANA_USERS_ENV, Node, NodeSpec},
    pipeline::uploader,
    runner::CommandRunner,
    tasks::CreateTasks,
    utils,
};

pub struct NodeCreator {
    spec: NodeSpec,
    payload: CreatePayload,
    runner: Arc<dyn CommandRunner>,
    verbose: bool,
}

impl std::fmt::Debug for NodeCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCreator")
            .field("spec", &self.spec)
            .field("payload", &self.payload)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl NodeCreator {
    pub fn new(
        spec: NodeSpec,
        payload: CreatePayload,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        if spec.kibana() && payload.kibana_network_tag().is_none() {
            return Err(EsflowError::Validation(format!("missing required kibana network tag for kibana node {}", spec.name())));
        }

        let verbose = payload.verbose();
        Ok(Self {
            spec,
            payload,
            runner,
            verbose,
        })
    }

    /// raise the effective verbosity, e.g. from a provisioner-wide config
    pub fn verbose(
        mut self,
        verbose: bool,
    ) -> Self {
        self.verbose = self.verbose || verbose;
        self
    }

    /// Kick off the full pipeline. The returned bundle is live
    /// immediately; attach observers before the first await point to see
    /// every stage transition.
    pub fn create(self) -> CreateTasks {
        let tasks = CreateTasks::new();

        let stages = tasks.clone();
        tokio::spawn(async move {
            match self.drive(&stages).await {
                Ok(node) => stages.main.end_ok(node),
                Err(err) => stages.main.end_err(err),
            }
        });

        tasks
    }

    /// Create the instance and nothing else: no readiness waits, no
    /// uploads, no lifecycle bundle. Used to bring a whole cluster's
    /// instances into existence before configuring any of them.
    pub async fn partial_create(&self) -> Result<Node> {
        self.create_instance().await
    }

    async fn drive(
        &self,
        tasks: &CreateTasks,
    ) -> Result<Node> {
        let node = tasks.node_create.run(self.create_instance()).await?;

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
            .sm_upload
            .run(uploader::upload_sm(self.runner.clone(), &node, self.payload.sm(), self.verbose))
            .await?;

        tasks
            .scripts_upload
            .run(uploader::upload_scripts(self.runner.clone(), &node, self.payload.scripts(), self.verbose))
            .await?;

        tasks
            .kso_upload
            .run(uploader::upload_kso(self.runner.clone(), &node, self.payload.kso(), self.verbose))
            .await?;

        Ok(node)
    }

    async fn create_instance(&self) -> Result<Node> {
        let env_file = self.write_env_file()?;
        let cmd = self.create_cmd(&env_file);

        if self.verbose {
            info!("creating node {} with the following command:\n\n{cmd}", self.spec.name());
        }

        let res = self.runner.run(&cmd, self.verbose).await;
        // the env file must not outlive the call, success or not
        let _ = fs::remove_file(&env_file);
        let out = res?;

        let descriptor: serde_json::Value = serde_json::from_str(&out)?;
        let ip = descriptor[0]["networkInterfaces"][0]["networkIP"]
            .as_str()
            .ok_or_else(|| EsflowError::Convert("create response has no internal ip".to_string()))?;
        let created_at = descriptor[0]["creationTimestamp"]
            .as_str()
            .ok_or_else(|| EsflowError::Convert("create response has no creation timestamp".to_string()))?;

        Node::new(self.spec.clone(), ip, utils::time::parse_millis(created_at)?)
    }

    fn create_cmd(
        &self,
        env_file: &Path,
    ) -> String {
        let labels = self
            .spec
            .merged_labels()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let mut flags = vec![
            format!("gcloud beta compute instances create-with-container {}", self.spec.name()),
            "--format=json".to_string(),
            format!("--boot-disk-size={}GB", self.spec.dsize()),
            format!("--boot-disk-type={}", self.spec.dtype().as_ref()),
            format!("--machine-type={}", self.spec.mtype()),
            format!("--zone={}", self.spec.zone()),
            // necessary to pull the image
            format!("--service-account={}", self.spec.service_account()),
            format!("--container-image={}", self.spec.image()),
            "--container-restart-policy=always".to_string(),
            // necessary to set the memlock ulimit
            "--container-privileged".to_string(),
            "--container-mount-host-path=mount-path=/usr/share/elasticsearch/data,host-path=/home/es-data,mode=rw".to_string(),
            format!("--container-mount-host-path=mount-path={KIBANA_PASSWORD_DIR},host-path=/home/kibana-users,mode=rw"),
            format!("--labels={labels}"),
            format!(
                "--metadata=startup-script=\"echo 'vm.max_map_count={}' > /etc/sysctl.conf; sysctl -p; mkdir -m 777 /home/es-data; mkdir -m 777 /home/kibana-users;\"",
                self.spec.max_map_count()
            ),
            format!("--container-env-file={}", env_file.display()),
        ];

        if self.spec.kibana() {
            if let Some(tag) = self.payload.kibana_network_tag() {
                flags.push(format!("--tags={tag}"));
            }
        }

        flags.join(" ")
    }

    fn write_env_file(&self) -> Result<PathBuf> {
        let mut env = self.spec.merged_env()?;

        if self.spec.kibana() {
            if let Some(users) = self.payload.kibana_users_env_value() {
                env.insert(KIBANA_USERS_ENV.to_string(), users);
            }
        }

        let path = std::env::temp_dir().join(format!("esflow-{}.env", utils::longid()));
        let content = env.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("\n");
        fs::write(&path, content)?;
        Ok(path)
    }
}
