//! Post-boot configuration payloads.
//!
//! A payload describes everything the pipeline applies to a node after it
//! is healthy: index settings/mappings, stored scripts and (create only)
//! kibana saved objects and credentials. All fields validate eagerly at
//! construction, before any remote call is attempted.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{EsflowError, Result};

/// A stored script to register with elasticsearch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Script {
    pub lang: String,
    pub source: String,
}

/// Raw caller input for a `CreatePayload`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOptions {
    pub interval: Option<u64>,
    pub kibana_network_tag: Option<String>,
    #[serde(default)]
    pub kibana_users: BTreeMap<String, String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, Script>,
    #[serde(default)]
    pub sm: BTreeMap<String, Value>,
    #[serde(default)]
    pub kso: Vec<Value>,
    #[serde(default)]
    pub verbose: bool,
}

/// Raw caller input for an `UpdatePayload`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOptions {
    pub interval: Option<u64>,
    #[serde(default)]
    pub scripts: BTreeMap<String, Script>,
    #[serde(default)]
    pub sm: BTreeMap<String, Value>,
    #[serde(default)]
    pub verbose: bool,
}

/// The validated field set both payload variants share.
#[derive(Debug, Clone)]
struct UploadSet {
    interval: u64,
    scripts: BTreeMap<String, Script>,
    sm: BTreeMap<String, Value>,
    verbose: bool,
}

impl UploadSet {
    fn new(
        interval: Option<u64>,
        scripts: BTreeMap<String, Script>,
        sm: BTreeMap<String, Value>,
        verbose: bool,
    ) -> Result<Self> {
        if let Some(interval) = interval {
            if interval < 1000 {
                return Err(EsflowError::Validation("interval must be >= 1000".to_string()));
            }
        }
        Ok(Self {
            interval: interval.unwrap_or(2000),
            scripts,
            sm,
            verbose,
        })
    }
}

/// Validated configuration applied by the create pipeline.
#[derive(Debug, Clone)]
pub struct CreatePayload {
    set: UploadSet,
    kibana_network_tag: Option<String>,
    kibana_users: BTreeMap<String, String>,
    kso: Vec<Value>,
}

impl CreatePayload {
    pub fn new(opts: CreateOptions) -> Result<Self> {
        if let Some(tag) = &opts.kibana_network_tag {
            if tag.is_empty() || tag.contains(char::is_whitespace) {
                return Err(EsflowError::Validation(format!("{tag} is not a valid name for a gce network tag")));
            }
        }
        for (username, password) in &opts.kibana_users {
            if username.is_empty() || username.len() > 255 {
                return Err(EsflowError::Validation("username must be a string <= 255 characters".to_string()));
            }
            if password.is_empty() || password.len() > 255 {
                return Err(EsflowError::Validation("password must be a string <= 255 characters".to_string()));
            }
        }

        Ok(Self {
            set: UploadSet::new(opts.interval, opts.scripts, opts.sm, opts.verbose)?,
            kibana_network_tag: opts.kibana_network_tag,
            kibana_users: opts.kibana_users,
            kso: opts.kso,
        })
    }

    pub fn interval(&self) -> u64 {
        self.set.interval
    }

    pub fn kibana_network_tag(&self) -> Option<&str> {
        self.kibana_network_tag.as_deref()
    }

    pub fn kso(&self) -> &[Value] {
        &self.kso
    }

    pub fn scripts(&self) -> &BTreeMap<String, Script> {
        &self.set.scripts
    }

    pub fn sm(&self) -> &BTreeMap<String, Value> {
        &self.set.sm
    }

    pub fn verbose(&self) -> bool {
        self.set.verbose
    }

    /// render the credentials map as the single env value the node's auth
    /// proxy reads: base64 of space-joined `user:{SHA256}digest` tokens
    pub(crate) fn kibana_users_env_value(&self) -> Option<String> {
        if self.kibana_users.is_empty() {
            return None;
        }
        let tokens: Vec<String> = self
            .kibana_users
            .iter()
            .map(|(username, password)| {
                let digest = Sha256::digest(password.as_bytes());
                format!("{username}:{{SHA256}}{}", STANDARD.encode(digest))
            })
            .collect();
        Some(STANDARD.encode(tokens.join(" ")))
    }
}

/// Validated configuration applied by the update pipeline.
#[derive(Debug, Clone)]
pub struct UpdatePayload {
    set: UploadSet,
}

impl UpdatePayload {
    pub fn new(opts: UpdateOptions) -> Result<Self> {
        Ok(Self {
            set: UploadSet::new(opts.interval, opts.scripts, opts.sm, opts.verbose)?,
        })
    }

    pub fn interval(&self) -> u64 {
        self.set.interval
    }

    pub fn scripts(&self) -> &BTreeMap<String, Script> {
        &self.set.scripts
    }

    pub fn sm(&self) -> &BTreeMap<String, Value> {
        &self.set.sm
    }

    pub fn verbose(&self) -> bool {
        self.set.verbose
    }
}
