//! The identity blob: a base64 JSON snapshot of a node's full desired
//! state, delivered to the instance as the single `esflow` env variable.
//!
//! The blob is the crate's only persistence. A live fleet is recovered by
//! listing instances that carry the reserved label and decoding this
//! variable back out of each instance's container declaration metadata.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::{
    EsflowError, Result,
    model::{ESFLOW_LABEL, NodeSpec, NodeSpecInput},
};

/// encode a spec as its identity blob; env entries marked for removal
/// (null values) are dropped so the blob reflects the applied state
pub fn encode(spec: &NodeSpec) -> Result<String> {
    let mut value = serde_json::to_value(spec)?;
    if let Some(env) = value.get_mut("env").and_then(|e| e.as_object_mut()) {
        env.retain(|_, v| !v.is_null());
    }
    Ok(STANDARD.encode(serde_json::to_string(&value)?))
}

/// decode an identity blob back into raw spec input; the caller validates
/// by rebuilding the spec
pub fn decode(blob: &str) -> Result<NodeSpecInput> {
    let raw = STANDARD.decode(blob).map_err(|e| EsflowError::Convert(e.to_string()))?;
    let text = String::from_utf8(raw)?;
    Ok(serde_json::from_str(&text)?)
}

#[derive(Deserialize)]
struct ContainerDeclaration {
    spec: DeclarationSpec,
}

#[derive(Deserialize)]
struct DeclarationSpec {
    containers: Vec<DeclaredContainer>,
}

#[derive(Deserialize)]
struct DeclaredContainer {
    #[serde(default)]
    env: Vec<DeclaredEnv>,
}

#[derive(Deserialize)]
struct DeclaredEnv {
    name: String,
    value: String,
}

/// pull the identity blob out of an instance's `gce-container-declaration`
/// metadata value and decode it
pub fn from_container_declaration(yaml: &str) -> Result<NodeSpecInput> {
    let decl: ContainerDeclaration = serde_yaml::from_str(yaml)?;
    let container = decl
        .spec
        .containers
        .first()
        .ok_or_else(|| EsflowError::Convert("container declaration has no containers".to_string()))?;
    let blob = container
        .env
        .iter()
        .find(|e| e.name == ESFLOW_LABEL)
        .ok_or_else(|| EsflowError::Convert(format!("container declaration has no {ESFLOW_LABEL} env entry")))?;
    decode(&blob.value)
}
