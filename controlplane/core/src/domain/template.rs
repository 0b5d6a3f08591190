// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Canonical template shape consumed by the lifecycle engine.
//!
//! Foreign dialects are normalized into this shape by the importer; the
//! engine itself only ever sees canonical templates.

use crate::domain::workload::Allocations;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub i64);

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopSignal {
    #[serde(rename = "SIGTERM")]
    Sigterm,
    #[serde(rename = "SIGINT")]
    Sigint,
    #[serde(rename = "SIGKILL")]
    Sigkill,
}

/// How the agent stops a container: a console command, a signal, or both.
/// An empty command means signal-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopBehavior {
    #[serde(default)]
    pub command: String,
    pub signal: StopSignal,
}

impl Default for StopBehavior {
    fn default() -> Self {
        Self { command: String::new(), signal: StopSignal::Sigterm }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableInput {
    Text,
    Number,
    Checkbox,
    Select,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    /// Environment variable name the agent exports.
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub default_value: String,
    #[serde(default)]
    pub required: bool,
    pub input: VariableInput,
    /// Validation rule string with the type atoms stripped.
    #[serde(default)]
    pub rules: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateFeatures {
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub config_files: Vec<String>,
    #[serde(default)]
    pub backup_paths: Vec<String>,
    #[serde(default = "default_true")]
    pub file_editor: bool,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    /// Canonical container image.
    pub image: String,
    /// label -> image, for user-selectable alternates.
    #[serde(default)]
    pub image_variants: BTreeMap<String, String>,
    /// Image the install script runs in, when different from `image`.
    #[serde(default)]
    pub install_image: Option<String>,
    /// Startup command with `{{NAME}}` placeholders over the variable set.
    pub startup: String,
    #[serde(default)]
    pub stop: StopBehavior,
    /// Install script in the portable shell dialect.
    #[serde(default)]
    pub install_script: String,
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub default_allocations: Allocations,
    #[serde(default)]
    pub features: TemplateFeatures,
}

impl Template {
    pub fn minimal(id: TemplateId, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            image: image.into(),
            image_variants: BTreeMap::new(),
            install_image: None,
            startup: String::new(),
            stop: StopBehavior::default(),
            install_script: String::new(),
            variables: Vec::new(),
            ports: Vec::new(),
            default_allocations: Allocations::default(),
            features: TemplateFeatures::default(),
        }
    }

    /// Variable defaults keyed by environment-variable name. The base layer
    /// of the composed agent environment.
    pub fn default_environment(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.default_value.clone()))
            .collect()
    }

    /// Substitute `{{NAME}}` placeholders in the startup command from the
    /// given environment. Unknown placeholders are left in place.
    pub fn render_startup(&self, env: &BTreeMap<String, String>) -> String {
        let mut out = self.startup.clone();
        for (key, value) in env {
            out = out.replace(&format!("{{{{{key}}}}}"), value);
        }
        out
    }

    pub fn variable(&self, name: &str) -> Option<&TemplateVariable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_rendering_substitutes_known_placeholders() {
        let mut t = Template::minimal(TemplateId(1), "mc", "game:latest");
        t.startup = "java -Xmx{{SERVER_MEMORY}}M -jar server.jar --port {{SERVER_PORT}}".into();

        let env = BTreeMap::from([
            ("SERVER_MEMORY".to_string(), "2048".to_string()),
            ("SERVER_PORT".to_string(), "25565".to_string()),
        ]);
        assert_eq!(
            t.render_startup(&env),
            "java -Xmx2048M -jar server.jar --port 25565"
        );

        t.startup = "run {{UNKNOWN}}".into();
        assert_eq!(t.render_startup(&env), "run {{UNKNOWN}}");
    }

    #[test]
    fn stop_behavior_serializes_signal_names() {
        let stop = StopBehavior { command: "stop".into(), signal: StopSignal::Sigint };
        let json = serde_json::to_value(&stop).unwrap();
        assert_eq!(json["signal"], "SIGINT");
    }
}
