//! Configuration uploads against a healthy node.
//!
//! Each upload tunnels through a remote exec: the JSON body is base64'd
//! into the command line, decoded on the instance and piped into curl
//! against the service's localhost port. Per-item calls within one stage
//! are dispatched concurrently; the first failure becomes the stage's
//! error while already-dispatched siblings run to completion unobserved.

use std::{collections::BTreeMap, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    EsflowError, Result,
    model::{Node, Script},
    runner::CommandRunner,
};

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// upload settings/mappings, one concurrent call per index; an index that
/// already exists counts as success
pub(crate) async fn upload_sm(
    runner: Arc<dyn CommandRunner>,
    node: &Node,
    sm: &BTreeMap<String, Value>,
    verbose: bool,
) -> Result<Vec<Value>> {
    let mut handles = Vec::new();

    for (index, doc) in sm {
        let cmd = remote_pipe_cmd(node, &format!("curl -s -XPUT localhost:9200/{index}"), doc)?;

        if verbose {
            info!("uploading settings/mappings for index {index} via\n{cmd}");
        }

        let runner = runner.clone();
        handles.push(tokio::spawn(async move {
            let out = runner.run(&cmd, false).await?;
            parse_elastic_response(&out, true)
        }));
    }

    collect(handles).await
}

/// upload stored scripts, one concurrent call per script
pub(crate) async fn upload_scripts(
    runner: Arc<dyn CommandRunner>,
    node: &Node,
    scripts: &BTreeMap<String, Script>,
    verbose: bool,
) -> Result<Vec<Value>> {
    let mut handles = Vec::new();

    for (name, script) in scripts {
        let body = json!({ "script": script });
        let cmd = remote_pipe_cmd(node, &format!("curl -s -XPOST localhost:9200/_scripts/{name}"), &body)?;

        if verbose {
            info!("uploading script {name} via\n{cmd}");
        }

        let runner = runner.clone();
        handles.push(tokio::spawn(async move {
            let out = runner.run(&cmd, false).await?;
            parse_elastic_response(&out, false)
        }));
    }

    collect(handles).await
}

/// bulk-create kibana saved objects; the remote api rejects documents
/// that still carry an updated_at stamp, so it is stripped first
pub(crate) async fn upload_kso(
    runner: Arc<dyn CommandRunner>,
    node: &Node,
    kso: &[Value],
    verbose: bool,
) -> Result<Vec<Value>> {
    // the bulk api rejects an empty array, resolve now
    if kso.is_empty() {
        return Ok(Vec::new());
    }

    let mut docs = kso.to_vec();
    for doc in &mut docs {
        if let Some(obj) = doc.as_object_mut() {
            obj.remove("updated_at");
        }
    }

    let cmd = remote_pipe_cmd(
        node,
        "curl -s -XPOST localhost:5601/api/saved_objects/_bulk_create?overwrite=true -H 'kbn-xsrf: true'",
        &Value::Array(docs),
    )?;

    if verbose {
        info!("uploading kibana saved objects via\n{cmd}");
    }

    let out = runner.run(&cmd, false).await?;
    let body: Value = serde_json::from_str(&out)?;

    if body.get("error").is_some() {
        return Err(EsflowError::Remote(body.to_string()));
    }

    let saved = body["saved_objects"]
        .as_array()
        .ok_or_else(|| EsflowError::Convert("bulk create response has no saved_objects".to_string()))?;

    // a per-item error inside an otherwise-successful batch is still fatal
    for item in saved {
        if item.get("error").is_some() {
            return Err(EsflowError::Remote(item.to_string()));
        }
    }

    Ok(saved.clone())
}

fn remote_pipe_cmd(
    node: &Node,
    curl: &str,
    body: &Value,
) -> Result<String> {
    let b64 = STANDARD.encode(serde_json::to_string(body)?);
    Ok(format!(
        "gcloud compute ssh {} --zone={} --command \"echo {b64} | base64 --decode | {curl} -H 'Content-Type: application/json' -d @-\"",
        node.spec().name(),
        node.spec().zone()
    ))
}

fn parse_elastic_response(
    out: &str,
    allow_existing: bool,
) -> Result<Value> {
    let body: Value = serde_json::from_str(out)?;
    if let Some(error) = body.get("error") {
        let kind = error["type"].as_str();
        if !(allow_existing && kind == Some(ALREADY_EXISTS)) {
            return Err(EsflowError::Remote(body.to_string()));
        }
    }
    Ok(body)
}

async fn collect(handles: Vec<JoinHandle<Result<Value>>>) -> Result<Vec<Value>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.map_err(|e| EsflowError::Execution(e.to_string()))??);
    }
    Ok(results)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        model::{NodeSpec, Script},
        testing::{ScriptedRunner, spec_input},
    };

    fn node() -> Node {
        Node::new(NodeSpec::new(spec_input()).unwrap(), "10.0.0.9", 1).unwrap()
    }

    fn decode_command_body(cmd: &str) -> Value {
        let b64 = cmd.split("echo ").nth(1).unwrap().split(' ').next().unwrap();
        serde_json::from_slice(&STANDARD.decode(b64).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_sm_upload_tolerates_existing_indexes() {
        let node = node();
        let mut sm = BTreeMap::new();
        sm.insert("idx-a".to_string(), json!({"settings": {"number_of_shards": 1}}));
        sm.insert("idx-b".to_string(), json!({"settings": {"number_of_shards": 2}}));

        let runner = Arc::new(ScriptedRunner::new(vec![
            ("idx-a", Ok(r#"{"error":{"type":"resource_already_exists_exception"}}"#.to_string())),
            ("idx-b", Ok(r#"{"acknowledged":true}"#.to_string())),
        ]));

        let results = upload_sm(runner, &node, &sm, false).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_sm_upload_other_errors_are_fatal() {
        let node = node();
        let mut sm = BTreeMap::new();
        sm.insert("idx-a".to_string(), json!({"settings": {}}));

        let runner = Arc::new(ScriptedRunner::new(vec![(
            "idx-a",
            Ok(r#"{"error":{"type":"mapper_parsing_exception"}}"#.to_string()),
        )]));

        let err = upload_sm(runner, &node, &sm, false).await.unwrap_err();
        assert!(matches!(err, EsflowError::Remote(_)));
    }

    #[tokio::test]
    async fn test_scripts_upload_never_tolerates_errors() {
        let node = node();
        let mut scripts = BTreeMap::new();
        scripts.insert(
            "by-count".to_string(),
            Script {
                lang: "painless".to_string(),
                source: "doc['count'].value".to_string(),
            },
        );

        let runner = Arc::new(ScriptedRunner::new(vec![(
            "_scripts/by-count",
            Ok(r#"{"error":{"type":"resource_already_exists_exception"}}"#.to_string()),
        )]));

        let err = upload_scripts(runner, &node, &scripts, false).await.unwrap_err();
        assert!(matches!(err, EsflowError::Remote(_)));
    }

    #[tokio::test]
    async fn test_kso_upload_short_circuits_on_empty() {
        let node = node();
        let runner = Arc::new(ScriptedRunner::new(vec![]));
        let results = upload_kso(runner.clone(), &node, &[], false).await.unwrap();
        assert!(results.is_empty());
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_kso_upload_strips_updated_at() {
        let node = node();
        let kso = vec![json!({"id": "dash-1", "updated_at": "2024-01-01T00:00:00Z"})];

        let runner = Arc::new(ScriptedRunner::new(vec![(
            "_bulk_create",
            Ok(r#"{"saved_objects":[{"id":"dash-1"}]}"#.to_string()),
        )]));

        let results = upload_kso(runner.clone(), &node, &kso, false).await.unwrap();
        assert_eq!(results.len(), 1);

        let body = decode_command_body(&runner.commands()[0]);
        assert!(body[0].get("updated_at").is_none());
        assert_eq!(body[0]["id"], "dash-1");
    }

    #[tokio::test]
    async fn test_kso_upload_per_item_errors_are_fatal() {
        let node = node();
        let kso = vec![json!({"id": "dash-1"})];

        let runner = Arc::new(ScriptedRunner::new(vec![(
            "_bulk_create",
            Ok(r#"{"saved_objects":[{"id":"dash-1","error":{"message":"bad"}}]}"#.to_string()),
        )]));

        let err = upload_kso(runner, &node, &kso, false).await.unwrap_err();
        assert!(matches!(err, EsflowError::Remote(_)));
    }
}
