//! Validated desired-state description of a node.
//!
//! A `NodeSpec` is pure data: every constraint is checked when it is
//! built from a `NodeSpecInput`, and nothing here performs I/O. The spec
//! also knows how to render itself as the environment and label sets the
//! instance is created with, including the base64 identity blob that makes
//! a provisioned instance self-describing.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EsflowError, Result, gce, identity};

/// the reserved label (and env variable) marking instances this crate manages
pub const ESFLOW_LABEL: &str = "esflow";

/// env variable carrying the hashed kibana credentials blob
pub const KIBANA_USERS_ENV: &str = "kibana_users";

/// in-container directory the kibana credentials file is mounted into
pub(crate) const KIBANA_PASSWORD_DIR: &str = "/etc/kibana-users";

/// env variables the crate itself renders; callers may not supply them
const RESERVED_ENV: &[&str] = &[
    "ES_JAVA_OPTS",
    "NODE_OPTIONS",
    "bootstrap.memory_lock",
    "cluster.name",
    ESFLOW_LABEL,
    KIBANA_USERS_ENV,
    "network.host",
    "node.data",
    "node.ingest",
    "node.master",
    "node.name",
];

static LABEL_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("^[a-z][a-z0-9_-]*$").unwrap());
static LABEL_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("^[a-z0-9_-]+$").unwrap());

/// Boot disk flavor of a node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DiskType {
    PdStandard,
    PdSsd,
}

/// Raw caller input for a `NodeSpec`.
///
/// Optional fields fall back to their documented defaults during
/// validation; the struct also deserializes a decoded identity blob, which
/// is why unknown fields (derived ones like `region`) are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpecInput {
    pub cluster_name: String,
    #[serde(default)]
    pub data: Option<bool>,
    pub dsize: u32,
    pub dtype: DiskType,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    pub hsize: u32,
    pub image: String,
    #[serde(default)]
    pub ingest: Option<bool>,
    #[serde(default)]
    pub khsize: Option<u32>,
    #[serde(default)]
    pub kibana: Option<bool>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub master: Option<bool>,
    #[serde(default)]
    pub max_map_count: Option<u64>,
    pub mtype: String,
    pub name: String,
    pub service_account: String,
    pub zone: String,
}

impl Default for NodeSpecInput {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            data: None,
            dsize: 0,
            dtype: DiskType::PdStandard,
            env: BTreeMap::new(),
            hsize: 0,
            image: String::new(),
            ingest: None,
            khsize: None,
            kibana: None,
            labels: BTreeMap::new(),
            master: None,
            max_map_count: None,
            mtype: String::new(),
            name: String::new(),
            service_account: String::new(),
            zone: String::new(),
        }
    }
}

/// Validated, immutable description of a node's desired configuration.
///
/// Only `set_env`, `set_hsize` and `set_khsize` mutate an existing spec,
/// and each re-validates its input.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeSpec {
    cluster_name: String,
    data: bool,
    dsize: u32,
    dtype: DiskType,
    env: BTreeMap<String, Value>,
    hsize: u32,
    image: String,
    ingest: bool,
    khsize: u32,
    kibana: bool,
    labels: BTreeMap<String, String>,
    master: bool,
    max_map_count: u64,
    mtype: String,
    name: String,
    region: String,
    service_account: String,
    short_region: String,
    zone: String,
}

impl NodeSpec {
    pub fn new(input: NodeSpecInput) -> Result<Self> {
        let mut spec = Self {
            cluster_name: String::new(),
            data: input.data.unwrap_or(true),
            dsize: 0,
            dtype: input.dtype,
            env: BTreeMap::new(),
            hsize: 0,
            image: String::new(),
            ingest: input.ingest.unwrap_or(false),
            khsize: 512,
            kibana: input.kibana.unwrap_or(false),
            labels: BTreeMap::new(),
            master: input.master.unwrap_or(true),
            max_map_count: 262144,
            mtype: String::new(),
            name: String::new(),
            region: String::new(),
            service_account: String::new(),
            short_region: String::new(),
            zone: String::new(),
        };

        spec.cluster_name = validate_token(&input.cluster_name, "cluster name")?;
        spec.set_dsize(input.dsize)?;
        spec.set_env(input.env)?;
        spec.set_hsize(input.hsize)?;
        if let Some(khsize) = input.khsize {
            spec.set_khsize(khsize)?;
        }
        spec.set_image(&input.image)?;
        spec.set_labels(input.labels)?;
        spec.set_max_map_count(input.max_map_count)?;
        spec.set_zone(&input.zone)?; // must set zone before mtype
        spec.set_mtype(&input.mtype)?;
        spec.name = validate_token(&input.name, "name")?;
        spec.set_service_account(&input.service_account)?;

        spec.region = input.zone[..input.zone.len() - 2].to_string();
        spec.short_region = gce::short_region(&spec.region)
            .ok_or_else(|| EsflowError::Validation(format!("no short region for {}", spec.region)))?
            .to_string();

        Ok(spec)
    }

    /// keys of all env vars marked for removal, i.e. set to null
    pub fn env_to_remove(&self) -> Vec<String> {
        self.env.iter().filter(|(_, v)| v.is_null()).map(|(k, _)| k.clone()).collect()
    }

    /// all creatable or updatable env entries: the reserved base set this
    /// crate manages, the identity blob, and the caller's env with null
    /// markers removed
    pub fn merged_env(&self) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        env.insert("ES_JAVA_OPTS".to_string(), format!("-Xms{0}m -Xmx{0}m", self.hsize));
        env.insert("NODE_OPTIONS".to_string(), format!("--max-old-space-size={}", self.khsize));
        env.insert("bootstrap.memory_lock".to_string(), "true".to_string());
        env.insert("cluster.name".to_string(), self.cluster_name.clone());
        env.insert(ESFLOW_LABEL.to_string(), identity::encode(self)?);
        env.insert("network.host".to_string(), "0.0.0.0".to_string());
        env.insert("node.data".to_string(), self.data.to_string());
        env.insert("node.ingest".to_string(), self.ingest.to_string());
        env.insert("node.master".to_string(), self.master.to_string());
        env.insert("node.name".to_string(), self.name.clone());

        for (k, v) in &self.env {
            if v.is_null() {
                continue;
            }
            env.insert(k.clone(), stringify_env_value(v));
        }

        Ok(env)
    }

    /// the reserved system label plus the caller's labels
    pub fn merged_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(ESFLOW_LABEL.to_string(), "true".to_string());
        for (k, v) in &self.labels {
            labels.insert(k.clone(), v.clone());
        }
        labels
    }

    /// merge additional env entries; a null value marks the key for
    /// removal on update
    pub fn set_env(
        &mut self,
        env: BTreeMap<String, Value>,
    ) -> Result<()> {
        for (k, v) in env {
            match v {
                Value::String(_) | Value::Null | Value::Number(_) | Value::Bool(_) => {}
                _ => return Err(EsflowError::Validation("an environment value must be a string|null|number|bool".to_string())),
            }
            if RESERVED_ENV.contains(&k.as_str()) {
                return Err(EsflowError::Validation(format!("{k} is a reserved env variable this crate sets")));
            }
            self.env.insert(k, v);
        }
        Ok(())
    }

    /// elasticsearch heap size in MB
    pub fn set_hsize(
        &mut self,
        hsize: u32,
    ) -> Result<()> {
        if !(100..=31000).contains(&hsize) {
            return Err(EsflowError::Validation(format!("es heap size of {hsize} must be an integer from [100, 31000]")));
        }
        self.hsize = hsize;
        Ok(())
    }

    /// kibana heap size in MB
    pub fn set_khsize(
        &mut self,
        khsize: u32,
    ) -> Result<()> {
        if khsize < 100 {
            return Err(EsflowError::Validation(format!("kibana heap size of {khsize} is too small")));
        }
        self.khsize = khsize;
        Ok(())
    }

    fn set_dsize(
        &mut self,
        dsize: u32,
    ) -> Result<()> {
        if !(10..=6400).contains(&dsize) {
            return Err(EsflowError::Validation(format!("disk size of {dsize} must be an integer from [10, 6400]")));
        }
        self.dsize = dsize;
        Ok(())
    }

    fn set_image(
        &mut self,
        image: &str,
    ) -> Result<()> {
        let known = gce::REGISTRIES.iter().any(|r| image.starts_with(&format!("{r}/")));
        if image.contains(char::is_whitespace) || !known {
            return Err(EsflowError::Validation(format!(
                "{image} is an invalid image name, expected {{{}}}/{{gcloud-project-id}}/{{image_name}}",
                gce::REGISTRIES.join(" | ")
            )));
        }
        self.image = image.to_string();
        Ok(())
    }

    fn set_labels(
        &mut self,
        labels: BTreeMap<String, String>,
    ) -> Result<()> {
        for (k, v) in labels {
            if v.is_empty() {
                return Err(EsflowError::Validation("a labels value must be a nonempty string".to_string()));
            }
            if !LABEL_KEY_RE.is_match(&k) {
                return Err(EsflowError::Validation(format!("label {k} must start with a lowercase letter and contain only a-z0-9_-")));
            }
            if !LABEL_VALUE_RE.is_match(&v) {
                return Err(EsflowError::Validation(format!("labels value {v} can contain only a-z0-9_-")));
            }
            if k == ESFLOW_LABEL {
                return Err(EsflowError::Validation(format!("{k} is a reserved label this crate sets")));
            }
            self.labels.insert(k, v);
        }
        Ok(())
    }

    fn set_max_map_count(
        &mut self,
        max_map_count: Option<u64>,
    ) -> Result<()> {
        if let Some(count) = max_map_count {
            if count == 0 {
                return Err(EsflowError::Validation("max map count must be an integer > 0".to_string()));
            }
            self.max_map_count = count;
        }
        Ok(())
    }

    fn set_mtype(
        &mut self,
        mtype: &str,
    ) -> Result<()> {
        if !gce::machine_types(&self.zone).contains(&mtype) {
            return Err(EsflowError::Validation(format!("mtype of {mtype} is an invalid gce machine type for zone {}", self.zone)));
        }
        self.mtype = mtype.to_string();
        Ok(())
    }

    fn set_service_account(
        &mut self,
        service_account: &str,
    ) -> Result<()> {
        if !service_account.contains("compute@developer") {
            return Err(EsflowError::Validation("must provide a valid default gce service account".to_string()));
        }
        self.service_account = service_account.to_string();
        Ok(())
    }

    fn set_zone(
        &mut self,
        zone: &str,
    ) -> Result<()> {
        if !gce::ZONES.contains(&zone) {
            return Err(EsflowError::Validation(format!("{zone} is an invalid gce zone")));
        }
        self.zone = zone.to_string();
        Ok(())
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn data(&self) -> bool {
        self.data
    }

    pub fn dsize(&self) -> u32 {
        self.dsize
    }

    pub fn dtype(&self) -> DiskType {
        self.dtype
    }

    pub fn env(&self) -> &BTreeMap<String, Value> {
        &self.env
    }

    pub fn hsize(&self) -> u32 {
        self.hsize
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn ingest(&self) -> bool {
        self.ingest
    }

    pub fn khsize(&self) -> u32 {
        self.khsize
    }

    pub fn kibana(&self) -> bool {
        self.kibana
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn master(&self) -> bool {
        self.master
    }

    pub fn max_map_count(&self) -> u64 {
        self.max_map_count
    }

    pub fn mtype(&self) -> &str {
        &self.mtype
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn service_account(&self) -> &str {
        &self.service_account
    }

    pub fn short_region(&self) -> &str {
        &self.short_region
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }
}

fn validate_token(
    value: &str,
    what: &str,
) -> Result<String> {
    if value.is_empty() || value.contains(char::is_whitespace) {
        return Err(EsflowError::Validation(format!("{value} is not a valid {what}")));
    }
    Ok(value.to_string())
}

fn stringify_env_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::testing::spec_input as valid_input;

    #[test]
    fn test_defaults_and_derived_fields() {
        let spec = NodeSpec::new(valid_input()).unwrap();
        assert!(spec.master());
        assert!(spec.data());
        assert!(!spec.ingest());
        assert!(!spec.kibana());
        assert_eq!(spec.khsize(), 512);
        assert_eq!(spec.max_map_count(), 262144);
        assert_eq!(spec.region(), "us-east1");
        assert_eq!(spec.short_region(), "ue1");
    }

    #[test]
    fn test_heap_size_bounds() {
        let mut input = valid_input();
        input.hsize = 99;
        assert!(matches!(NodeSpec::new(input), Err(EsflowError::Validation(_))));

        let mut input = valid_input();
        input.hsize = 31001;
        assert!(matches!(NodeSpec::new(input), Err(EsflowError::Validation(_))));

        let mut input = valid_input();
        input.hsize = 31000;
        assert!(NodeSpec::new(input).is_ok());
    }

    #[test]
    fn test_reserved_env_rejected() {
        let mut input = valid_input();
        input.env.insert("node.master".to_string(), json!(false));
        assert!(matches!(NodeSpec::new(input), Err(EsflowError::Validation(_))));
    }

    #[test]
    fn test_env_value_types() {
        let mut input = valid_input();
        input.env.insert("a".to_string(), json!("one"));
        input.env.insert("b".to_string(), json!(2));
        input.env.insert("c".to_string(), json!(true));
        input.env.insert("d".to_string(), Value::Null);
        let spec = NodeSpec::new(input).unwrap();
        assert_eq!(spec.env_to_remove(), vec!["d".to_string()]);

        let mut input = valid_input();
        input.env.insert("bad".to_string(), json!({"nested": 1}));
        assert!(NodeSpec::new(input).is_err());
    }

    #[test]
    fn test_mtype_is_zone_scoped() {
        let mut input = valid_input();
        input.mtype = "n1-mega-512".to_string();
        assert!(matches!(NodeSpec::new(input), Err(EsflowError::Validation(_))));

        let mut input = valid_input();
        input.zone = "us-moon1-a".to_string();
        assert!(matches!(NodeSpec::new(input), Err(EsflowError::Validation(_))));
    }

    #[test]
    fn test_label_validation() {
        let mut input = valid_input();
        input.labels.insert("Env".to_string(), "prod".to_string());
        assert!(NodeSpec::new(input).is_err());

        let mut input = valid_input();
        input.labels.insert("env".to_string(), "Prod!".to_string());
        assert!(NodeSpec::new(input).is_err());

        let mut input = valid_input();
        input.labels.insert(ESFLOW_LABEL.to_string(), "true".to_string());
        assert!(NodeSpec::new(input).is_err());

        let mut input = valid_input();
        input.labels.insert("env".to_string(), "prod".to_string());
        let spec = NodeSpec::new(input).unwrap();
        let merged = spec.merged_labels();
        assert_eq!(merged.get(ESFLOW_LABEL).map(String::as_str), Some("true"));
        assert_eq!(merged.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_merged_env() {
        let mut input = valid_input();
        input.env.insert("x".to_string(), Value::Null);
        input.env.insert("y".to_string(), json!(7));
        let spec = NodeSpec::new(input).unwrap();

        let env = spec.merged_env().unwrap();
        assert_eq!(env.get("ES_JAVA_OPTS").map(String::as_str), Some("-Xms1024m -Xmx1024m"));
        assert_eq!(env.get("NODE_OPTIONS").map(String::as_str), Some("--max-old-space-size=512"));
        assert_eq!(env.get("cluster.name").map(String::as_str), Some("logs"));
        assert_eq!(env.get("node.name").map(String::as_str), Some("es-node-1"));
        assert_eq!(env.get("node.data").map(String::as_str), Some("true"));
        assert_eq!(env.get("y").map(String::as_str), Some("7"));
        assert!(env.contains_key(ESFLOW_LABEL));
        assert!(!env.contains_key("x"));
    }

    #[test]
    fn test_setters_revalidate() {
        let mut spec = NodeSpec::new(valid_input()).unwrap();
        assert!(spec.set_hsize(50).is_err());
        assert!(spec.set_khsize(99).is_err());
        spec.set_khsize(2048).unwrap();
        assert_eq!(spec.khsize(), 2048);

        let mut env = BTreeMap::new();
        env.insert("cluster.name".to_string(), json!("other"));
        assert!(spec.set_env(env).is_err());
    }
}
