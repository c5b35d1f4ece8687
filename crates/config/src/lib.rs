// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_duration_ns() -> u64 {
    1_000_000
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration item '{0}' is missing")]
    Missing(String),
    #[error("configuration item '{key}' is not a {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Handle into an immutable configuration tree.
///
/// Cloning a node is cheap: every node shares the same root and only carries
/// its JSON pointer into it. Children are resolved lazily on access.
#[derive(Clone)]
pub struct ConfigNode {
    root: Arc<serde_json::Value>,
    pointer: String,
}

impl ConfigNode {
    pub fn from_value(value: serde_json::Value) -> Self {
        Self {
            root: Arc::new(value),
            pointer: String::new(),
        }
    }

    pub fn empty() -> Self {
        Self::from_value(serde_json::Value::Object(Default::default()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_yaml::from_str(content).context("Failed to parse configuration YAML")?;
        Ok(Self::from_value(value))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(content).context("Failed to parse configuration JSON")?;
        Ok(Self::from_value(value))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// The value this node points at. A node whose path no longer resolves
    /// reads as `null`.
    pub fn value(&self) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        self.root.pointer(&self.pointer).unwrap_or(&NULL)
    }

    /// Slash-separated location of this node inside the tree (empty for the root).
    pub fn path(&self) -> String {
        self.pointer
            .split('/')
            .skip(1)
            .map(unescape_token)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Child entry of a mapping node.
    pub fn get(&self, key: &str) -> Option<ConfigNode> {
        let child = self.value().as_object()?.get(key)?;
        if child.is_null() {
            return None;
        }
        Some(Self {
            root: Arc::clone(&self.root),
            pointer: format!("{}/{}", self.pointer, escape_token(key)),
        })
    }

    /// Nested lookup, e.g. `get_path("uart/baudrate")`.
    pub fn get_path(&self, path: &str) -> Option<ConfigNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self.clone(), |node, segment| node.get(segment))
    }

    pub fn keys(&self) -> Vec<String> {
        self.value()
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_null(&self) -> bool {
        self.value().is_null()
    }

    pub fn get_str(&self) -> Option<&str> {
        self.value().as_str()
    }

    pub fn get_u64(&self) -> Option<u64> {
        self.value().as_u64()
    }

    pub fn get_bool(&self) -> Option<bool> {
        self.value().as_bool()
    }

    /// Reads a required string entry under `key`.
    pub fn require_str(&self, key: &str) -> Result<String, ConfigError> {
        let node = self
            .get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        node.get_str()
            .map(str::to_string)
            .ok_or_else(|| ConfigError::WrongType {
                key: key.to_string(),
                expected: "string",
            })
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|n| n.get_u64()).unwrap_or(default)
    }
}

impl fmt::Debug for ConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigNode")
            .field("path", &self.path())
            .field("value", self.value())
            .finish()
    }
}

impl Default for ConfigNode {
    fn default() -> Self {
        Self::empty()
    }
}

fn escape_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// One peripheral model instance in a host manifest.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelEntry {
    pub name: String,
    /// Free-form model configuration. Must carry a `module` entry.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Interface names the host binds to simulator-side signals.
    #[serde(default)]
    pub bindings: Vec<String>,
}

impl ModelEntry {
    pub fn config_node(&self) -> ConfigNode {
        ConfigNode::from_value(self.config.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    /// Simulated run length in nanoseconds.
    #[serde(default = "default_duration_ns")]
    pub duration_ns: u64,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

impl HostManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path)
            .with_context(|| format!("Failed to open host manifest {:?}", path))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse Host Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.name.as_str()) {
                anyhow::bail!("Duplicate model name '{}' in manifest", model.name);
            }
        }
        if self.models.is_empty() {
            tracing::warn!("Host manifest '{}' declares no models", self.name);
        }
        Ok(())
    }
}
