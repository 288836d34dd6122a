//! A provisioned node: validated spec plus the runtime facts the cloud
//! reported back (internal IP, external IP after an update, creation
//! time), and the instance-level operations that act on it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::{
    EsflowError, Result, identity,
    model::{ESFLOW_LABEL, NodeSpec, UpdatePayload},
    pipeline::NodeUpdater,
    probe::{HealthProbe, Readiness},
    runner::CommandRunner,
    tasks::UpdateTasks,
    utils,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    spec: NodeSpec,
    ip: String,
    eip: Option<String>,
    created: i64,
}

impl Node {
    pub fn new(
        spec: NodeSpec,
        ip: impl Into<String>,
        created: i64,
    ) -> Result<Self> {
        let ip = ip.into();
        if ip.is_empty() {
            return Err(EsflowError::Validation("ip not a valid string".to_string()));
        }
        if created <= 0 {
            return Err(EsflowError::Validation("invalid value for created".to_string()));
        }
        Ok(Self {
            spec,
            ip,
            eip: None,
            created,
        })
    }

    /// Discovery: list the instances carrying the reserved label, decode
    /// each one's identity blob and rebuild its `Node`. Instances whose
    /// blob fails to decode or validate (typically still mid-creation) are
    /// skipped silently.
    pub async fn fetch_all(
        runner: &dyn CommandRunner,
        verbose: bool,
    ) -> Result<Vec<Node>> {
        let cmd = format!("gcloud compute instances list --format=json --filter=\"labels:{ESFLOW_LABEL}\"");

        if verbose {
            info!("fetching all nodes this crate has created via\n{cmd}");
        }

        let out = runner.run(&cmd, verbose).await?;
        let vms: Vec<Value> = serde_json::from_str(&out)?;

        let mut nodes = Vec::new();
        for vm in &vms {
            match Self::from_instance(vm) {
                Ok(node) => nodes.push(node),
                Err(err) => debug!("skipping instance without a decodable identity: {err}"),
            }
        }
        Ok(nodes)
    }

    fn from_instance(vm: &Value) -> Result<Node> {
        let ip = vm["networkInterfaces"][0]["networkIP"]
            .as_str()
            .ok_or_else(|| EsflowError::Convert("instance has no internal ip".to_string()))?;
        let created_at = vm["creationTimestamp"]
            .as_str()
            .ok_or_else(|| EsflowError::Convert("instance has no creation timestamp".to_string()))?;
        let created = utils::time::parse_millis(created_at)?;

        let items = vm["metadata"]["items"]
            .as_array()
            .ok_or_else(|| EsflowError::Convert("instance has no metadata".to_string()))?;
        let declaration = items
            .iter()
            .find(|item| item["key"] == "gce-container-declaration")
            .and_then(|item| item["value"].as_str())
            .ok_or_else(|| EsflowError::Convert("instance has no container declaration".to_string()))?;

        let input = identity::from_container_declaration(declaration)?;
        let spec = NodeSpec::new(input)?;
        Node::new(spec, ip, created)
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn spec_mut(&mut self) -> &mut NodeSpec {
        &mut self.spec
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// external IP; only known after an update pass
    pub fn eip(&self) -> Option<&str> {
        self.eip.as_deref()
    }

    /// creation time in epoch millis
    pub fn created(&self) -> i64 {
        self.created
    }

    pub(crate) fn set_ips(
        &mut self,
        ip: &str,
        eip: &str,
    ) -> Result<()> {
        if ip.is_empty() {
            return Err(EsflowError::Validation("ip not a valid string".to_string()));
        }
        self.ip = ip.to_string();
        self.eip = Some(eip.to_string());
        Ok(())
    }

    /// run a command on the instance; the caller wraps it in quotes
    pub async fn remote_exec(
        &self,
        runner: &dyn CommandRunner,
        cmd: &str,
        verbose: bool,
    ) -> Result<String> {
        if cmd.is_empty() {
            return Err(EsflowError::Validation("command missing".to_string()));
        }

        let wrapped = format!("gcloud compute ssh {} --zone {} --command {cmd}", self.spec.name(), self.spec.zone());

        if verbose {
            info!("executing: {wrapped}");
        }

        runner.run(&wrapped, verbose).await
    }

    pub async fn delete(
        &self,
        runner: &dyn CommandRunner,
        verbose: bool,
    ) -> Result<()> {
        let cmd = format!("printf \"y\\n\" | gcloud compute instances delete {} --zone {}", self.spec.name(), self.spec.zone());

        if verbose {
            info!("deleting instance {} via {cmd}", self.spec.name());
        }

        runner.run(&cmd, verbose).await?;
        Ok(())
    }

    pub async fn restart(
        &self,
        runner: &dyn CommandRunner,
        verbose: bool,
    ) -> Result<()> {
        self.stop(runner, verbose).await?;
        self.start(runner, verbose).await
    }

    pub async fn start(
        &self,
        runner: &dyn CommandRunner,
        verbose: bool,
    ) -> Result<()> {
        let cmd = format!("gcloud compute instances start {} --zone {}", self.spec.name(), self.spec.zone());

        if verbose {
            info!("starting instance {} via {cmd}", self.spec.name());
        }

        runner.run(&cmd, verbose).await?;
        Ok(())
    }

    pub async fn stop(
        &self,
        runner: &dyn CommandRunner,
        verbose: bool,
    ) -> Result<()> {
        let cmd = format!("gcloud compute instances stop {} --zone {}", self.spec.name(), self.spec.zone());

        if verbose {
            info!("stopping instance {} via {cmd}", self.spec.name());
        }

        runner.run(&cmd, verbose).await?;
        Ok(())
    }

    /// spawn the update pipeline for this node
    pub fn update(
        self,
        payload: UpdatePayload,
        runner: Arc<dyn CommandRunner>,
    ) -> UpdateTasks {
        NodeUpdater::new(self, payload, runner).update()
    }

    /// poll the cluster-health endpoint until elasticsearch reports a
    /// yellow or green cluster
    pub async fn wait_for_elastic(
        &self,
        runner: &dyn CommandRunner,
        interval_ms: u64,
        verbose: bool,
    ) -> Result<()> {
        let cmd = format!(
            "gcloud compute ssh {} --zone {} --command \"curl -s localhost:9200/_cluster/health\"",
            self.spec.name(),
            self.spec.zone()
        );

        if verbose {
            info!("waiting for state >= yellow from elastic for {} via\n{cmd}", self.spec.name());
        }

        let probe = HealthProbe::new(interval_ms)?;
        probe
            .wait(|| {
                let cmd = cmd.clone();
                async move {
                    let out = runner.run(&cmd, false).await?;
                    let health: Value = serde_json::from_str(&out)?;
                    match health["status"].as_str() {
                        Some("yellow") | Some("green") => Ok(Readiness::Ready),
                        _ => Ok(Readiness::NotReady),
                    }
                }
            })
            .await;
        Ok(())
    }

    /// poll the dashboard root path until kibana answers 200
    pub async fn wait_for_kibana(
        &self,
        runner: &dyn CommandRunner,
        interval_ms: u64,
        verbose: bool,
    ) -> Result<()> {
        if !self.spec.kibana() {
            return Err(EsflowError::Validation(format!("{} is not a kibana node, it will never answer 200", self.spec.name())));
        }

        let cmd = format!(
            "gcloud compute ssh {} --zone {} --command 'curl -s -o /dev/null -w \"%{{http_code}}\" localhost:5601'",
            self.spec.name(),
            self.spec.zone()
        );

        if verbose {
            info!("waiting for status 200 from kibana for {} via\n{cmd}", self.spec.name());
        }

        let probe = HealthProbe::new(interval_ms)?;
        probe
            .wait(|| {
                let cmd = cmd.clone();
                async move {
                    let out = runner.run(&cmd, false).await?;
                    if out.trim() == "200" { Ok(Readiness::Ready) } else { Ok(Readiness::NotReady) }
                }
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{ScriptedRunner, spec_input};

    fn instance_json(blob: &str) -> String {
        let declaration = format!("spec:\n  containers:\n    - env:\n        - name: {ESFLOW_LABEL}\n          value: {blob}\n");
        serde_json::to_string(&serde_json::json!([
            {
                "creationTimestamp": "2024-03-01T08:00:00Z",
                "networkInterfaces": [{"networkIP": "10.0.0.9"}],
                "metadata": {"items": [{"key": "gce-container-declaration", "value": declaration}]}
            },
            {
                "creationTimestamp": "2024-03-01T08:00:05Z",
                "networkInterfaces": [{"networkIP": "10.0.0.10"}],
                "metadata": {"items": [{"key": "gce-container-declaration", "value": "spec:\n  containers: []\n"}]}
            }
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_all_skips_undecodable_instances() {
        let spec = NodeSpec::new(spec_input()).unwrap();
        let blob = identity::encode(&spec).unwrap();

        let runner = ScriptedRunner::new(vec![("instances list", Ok(instance_json(&blob)))]);
        let nodes = Node::fetch_all(&runner, false).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].ip(), "10.0.0.9");
        assert_eq!(nodes[0].spec().name(), spec.name());
        assert!(nodes[0].eip().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_kibana_requires_the_role() {
        let spec = NodeSpec::new(spec_input()).unwrap();
        let node = Node::new(spec, "10.0.0.9", 1).unwrap();
        let runner = ScriptedRunner::new(vec![]);

        let err = node.wait_for_kibana(&runner, 1000, false).await.unwrap_err();
        assert!(matches!(err, EsflowError::Validation(_)));
    }

    #[test]
    fn test_runtime_fact_validation() {
        let spec = NodeSpec::new(spec_input()).unwrap();
        assert!(Node::new(spec.clone(), "", 1).is_err());
        assert!(Node::new(spec, "10.0.0.9", 0).is_err());
    }
}
