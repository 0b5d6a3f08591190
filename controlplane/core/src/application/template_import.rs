// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Template importer and normalizer.
//!
//! Ingests either a canonical template document or one of two known foreign
//! dialects (a JSON egg shape and its YAML rendering), detected by shape
//! heuristics: a meta-version prefix, or a `docker_images` object together
//! with `variables[]` entries carrying an environment-variable field.
//! Normalization rewrites startup placeholders and lowers the install
//! script into the portable shell dialect the agents run.

use crate::domain::template::{
    StopBehavior, StopSignal, Template, TemplateId, TemplateVariable, VariableInput,
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Meta-version prefix of the foreign JSON dialect.
const FOREIGN_META_PREFIX: &str = "PTDL_";

/// Utilities the preflight block provides when the script carries no
/// package-install step of its own.
const PREFLIGHT_UTILITIES: &[&str] = &["curl", "wget", "jq", "unzip", "tar", "ca-certificates"];

/// Rule atoms that describe the value type; consumed into the input kind
/// and stripped from the retained rule string.
const TYPE_ATOMS: &[&str] = &["boolean", "integer", "numeric", "string"];

/// Built-ins synthesized when referenced but not declared.
const BUILTIN_DEFAULTS: &[(&str, &str, &str)] = &[
    ("SERVER_MEMORY", "Allocated memory in MiB", "1024"),
    ("SERVER_PORT", "Primary listen port", "25565"),
    ("SERVER_IP", "Bind address", "0.0.0.0"),
    ("TZ", "Container time zone", "UTC"),
];

static BRACED_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z][A-Z0-9_]*)\}").expect("static pattern"));
static BARE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z][A-Z0-9_]*)").expect("static pattern"));
static TEST_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\[\]]*\]").expect("static pattern"));
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").expect("static pattern"));

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("document is neither valid JSON nor valid YAML: {0}")]
    Parse(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

impl From<ImportError> for crate::domain::error::CoreError {
    fn from(e: ImportError) -> Self {
        crate::domain::error::CoreError::Validation(e.to_string())
    }
}

#[derive(Default)]
pub struct TemplateImporter;

impl TemplateImporter {
    pub fn new() -> Self {
        Self
    }

    /// Import a template document in any accepted dialect and return the
    /// canonical shape. Canonical input passes through unchanged apart from
    /// defaulted optional fields.
    pub fn import(&self, raw: &str) -> Result<Template, ImportError> {
        let value = parse_document(raw)?;
        if is_foreign(&value) {
            self.normalize_foreign(value)
        } else {
            self.parse_native(value)
        }
    }

    fn parse_native(&self, mut value: Value) -> Result<Template, ImportError> {
        if let Some(map) = value.as_object_mut() {
            // The id is repository-assigned; documents rarely carry one.
            map.entry("id").or_insert(Value::from(0));
        }
        let template: Template =
            serde_json::from_value(value).map_err(|e| ImportError::Parse(e.to_string()))?;

        let mut missing = Vec::new();
        if template.name.is_empty() {
            missing.push("name".to_string());
        }
        if template.image.is_empty() {
            missing.push("image".to_string());
        }
        if template.startup.is_empty() {
            missing.push("startup".to_string());
        }
        if !missing.is_empty() {
            return Err(ImportError::MissingFields(missing));
        }
        Ok(template)
    }

    fn normalize_foreign(&self, value: Value) -> Result<Template, ImportError> {
        let mut missing = Vec::new();

        let name = value
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        if name.is_empty() {
            missing.push("name".to_string());
        }

        // Primary image is the first docker_images entry; the rest become
        // labeled variants.
        let mut image = String::new();
        let mut image_variants = BTreeMap::new();
        if let Some(images) = value.get("docker_images").and_then(Value::as_object) {
            for (index, (label, entry)) in images.iter().enumerate() {
                let Some(entry) = entry.as_str() else { continue };
                if index == 0 {
                    image = entry.to_string();
                } else {
                    image_variants.insert(label.clone(), entry.to_string());
                }
            }
        }
        if image.is_empty() {
            missing.push("docker_images".to_string());
        }

        let raw_startup =
            value.get("startup").and_then(Value::as_str).unwrap_or_default().to_string();
        if raw_startup.is_empty() {
            missing.push("startup".to_string());
        }
        if !missing.is_empty() {
            return Err(ImportError::MissingFields(missing));
        }
        let startup = rewrite_placeholders(&raw_startup);

        let stop = value
            .pointer("/config/stop")
            .and_then(Value::as_str)
            .map(normalize_stop)
            .unwrap_or_default();

        let install_image = value
            .pointer("/scripts/installation/container")
            .and_then(Value::as_str)
            .map(str::to_string);
        let install_script = value
            .pointer("/scripts/installation/script")
            .and_then(Value::as_str)
            .map(normalize_install_script)
            .unwrap_or_default();

        let mut variables = Vec::new();
        if let Some(raw_variables) = value.get("variables").and_then(Value::as_array) {
            for raw in raw_variables {
                let display =
                    raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let env_name = raw
                    .get("env_variable")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| display.clone());
                if env_name.is_empty() {
                    continue;
                }
                let rules =
                    raw.get("rules").and_then(Value::as_str).unwrap_or_default().to_string();
                variables.push(TemplateVariable {
                    name: env_name,
                    description: display,
                    default_value: raw
                        .get("default_value")
                        .map(value_to_string)
                        .unwrap_or_default(),
                    required: rules.split('|').any(|atom| atom == "required"),
                    input: infer_input(&rules),
                    rules: strip_type_atoms(&rules),
                });
            }
        }

        synthesize_builtins(&mut variables, &startup, &install_script);

        Ok(Template {
            id: TemplateId(0),
            name,
            image,
            image_variants,
            install_image,
            startup,
            stop,
            install_script,
            variables,
            ports: Vec::new(),
            default_allocations: Default::default(),
            features: Default::default(),
        })
    }
}

fn parse_document(raw: &str) -> Result<Value, ImportError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        _ => serde_yaml::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .ok_or_else(|| ImportError::Parse("expected a mapping document".to_string())),
    }
}

/// Shape heuristics for the foreign dialects.
fn is_foreign(value: &Value) -> bool {
    if let Some(version) = value.pointer("/meta/version").and_then(Value::as_str) {
        if version.starts_with(FOREIGN_META_PREFIX) {
            return true;
        }
    }
    let has_images = value.get("docker_images").is_some_and(Value::is_object);
    let has_env_variables = value
        .get("variables")
        .and_then(Value::as_array)
        .is_some_and(|vars| vars.iter().any(|v| v.get("env_variable").is_some()));
    has_images && has_env_variables
}

/// `${VAR}` and `$VAR` (uppercase identifiers only) become `{{VAR}}`.
fn rewrite_placeholders(input: &str) -> String {
    let braced = BRACED_VAR.replace_all(input, "{{$1}}");
    BARE_VAR.replace_all(&braced, "{{$1}}").into_owned()
}

fn normalize_stop(token: &str) -> StopBehavior {
    match token.trim() {
        "^C" | "^c" | "SIGINT" => StopBehavior { command: String::new(), signal: StopSignal::Sigint },
        "SIGTERM" => StopBehavior { command: String::new(), signal: StopSignal::Sigterm },
        "SIGKILL" => StopBehavior { command: String::new(), signal: StopSignal::Sigkill },
        other => StopBehavior {
            command: other.trim_start_matches('/').to_string(),
            signal: StopSignal::Sigterm,
        },
    }
}

/// Lower a foreign install script into the portable dialect.
fn normalize_install_script(script: &str) -> String {
    let mut script = script.replace("\r\n", "\n");

    // Shebang: everything funnels through bash.
    for sh in ["#!/bin/sh", "#!/bin/ash", "#!/usr/bin/env sh", "#!/usr/bin/env ash"] {
        if script.starts_with(sh) {
            script = script.replacen(sh, "#!/bin/bash", 1);
            break;
        }
    }

    script = script.replace("/mnt/server", "{{SERVER_DIR}}");
    script = script.replace("[[", "[").replace("]]", "]");

    // `==` is bashism inside test brackets; lower to `=`.
    script = TEST_BRACKETS
        .replace_all(&script, |caps: &regex::Captures<'_>| caps[0].replace(" == ", " = "))
        .into_owned();

    let has_package_step = ["apt install", "apt-get install", "apk add", "yum install"]
        .iter()
        .any(|step| script.contains(step));
    if !has_package_step {
        script = prepend_after_shebang(&script, &preflight_block());
    }

    if !script.contains("set -e") {
        script = prepend_after_shebang(&script, "set -e\n");
    }

    script
}

fn preflight_block() -> String {
    format!(
        "if command -v apt-get >/dev/null 2>&1; then\n    apt-get update -qq && apt-get install -y -qq {}\nfi\n",
        PREFLIGHT_UTILITIES.join(" ")
    )
}

fn prepend_after_shebang(script: &str, block: &str) -> String {
    if let Some(rest) = script.strip_prefix("#!") {
        match rest.find('\n') {
            Some(offset) => {
                // offset is relative to the text after "#!"; +3 keeps the
                // trailing newline with the shebang line.
                let (shebang, body) = script.split_at(offset + 3);
                format!("{shebang}{block}{body}")
            }
            None => format!("{script}\n{block}"),
        }
    } else {
        format!("{block}{script}")
    }
}

fn infer_input(rules: &str) -> VariableInput {
    let atoms: Vec<&str> = rules.split('|').collect();
    if atoms.iter().any(|a| *a == "boolean") {
        VariableInput::Checkbox
    } else if atoms.iter().any(|a| *a == "integer" || *a == "numeric") {
        VariableInput::Number
    } else if atoms.iter().any(|a| a.starts_with("in:")) {
        VariableInput::Select
    } else {
        VariableInput::Text
    }
}

fn strip_type_atoms(rules: &str) -> String {
    rules
        .split('|')
        .filter(|atom| !atom.is_empty() && !TYPE_ATOMS.contains(atom))
        .collect::<Vec<_>>()
        .join("|")
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Synthesize built-in variables referenced by the startup command or the
/// install script but not declared.
fn synthesize_builtins(variables: &mut Vec<TemplateVariable>, startup: &str, install: &str) {
    let mut referenced: Vec<String> = Vec::new();
    for text in [startup, install] {
        for caps in PLACEHOLDER.captures_iter(text) {
            referenced.push(caps[1].to_string());
        }
    }

    for (name, description, default) in BUILTIN_DEFAULTS {
        if referenced.iter().any(|r| r == name) && !variables.iter().any(|v| v.name == *name) {
            variables.push(TemplateVariable {
                name: (*name).to_string(),
                description: (*description).to_string(),
                default_value: (*default).to_string(),
                required: false,
                input: VariableInput::Text,
                rules: String::new(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign_json() -> String {
        serde_json::json!({
            "meta": { "version": "PTDL_v2" },
            "name": "Vanilla Minecraft",
            "description": "Vanilla server",
            "docker_images": {
                "Java 21": "ghcr.io/images/java:21",
                "Java 17": "ghcr.io/images/java:17"
            },
            "startup": "java -Xmx${SERVER_MEMORY}M -jar {{SERVER_JARFILE}} --port $SERVER_PORT",
            "config": { "stop": "^C" },
            "scripts": {
                "installation": {
                    "script": "#!/bin/ash\ncd /mnt/server\nif [[ \"$VERSION\" == \"latest\" ]]; then\n  curl -o server.jar $DL_URL\nfi\n",
                    "container": "ghcr.io/installers/alpine",
                    "entrypoint": "ash"
                }
            },
            "variables": [
                {
                    "name": "Server Jar File",
                    "description": "The jar to run",
                    "env_variable": "SERVER_JARFILE",
                    "default_value": "server.jar",
                    "rules": "required|string|max:40"
                },
                {
                    "name": "Use Aikar Flags",
                    "env_variable": "AIKAR",
                    "default_value": "0",
                    "rules": "boolean"
                },
                {
                    "name": "Version",
                    "env_variable": "VERSION",
                    "default_value": "latest",
                    "rules": "required|in:latest,1.21,1.20"
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn detects_and_normalizes_foreign_json() {
        let template = TemplateImporter::new().import(&foreign_json()).unwrap();

        assert_eq!(template.name, "Vanilla Minecraft");
        assert_eq!(template.image, "ghcr.io/images/java:21");
        assert_eq!(template.image_variants["Java 17"], "ghcr.io/images/java:17");
        assert_eq!(template.install_image.as_deref(), Some("ghcr.io/installers/alpine"));

        // ${VAR} and $VAR both rewritten; existing {{VAR}} untouched.
        assert_eq!(
            template.startup,
            "java -Xmx{{SERVER_MEMORY}}M -jar {{SERVER_JARFILE}} --port {{SERVER_PORT}}"
        );

        assert_eq!(template.stop.signal, StopSignal::Sigint);
        assert!(template.stop.command.is_empty());
    }

    #[test]
    fn variable_normalization() {
        let template = TemplateImporter::new().import(&foreign_json()).unwrap();

        let jar = template.variable("SERVER_JARFILE").unwrap();
        assert_eq!(jar.description, "Server Jar File");
        assert_eq!(jar.default_value, "server.jar");
        assert!(jar.required);
        assert_eq!(jar.input, VariableInput::Text);
        assert_eq!(jar.rules, "required|max:40");

        let aikar = template.variable("AIKAR").unwrap();
        assert_eq!(aikar.input, VariableInput::Checkbox);
        assert!(!aikar.required);

        let version = template.variable("VERSION").unwrap();
        assert_eq!(version.input, VariableInput::Select);
        assert_eq!(version.rules, "required|in:latest,1.21,1.20");
    }

    #[test]
    fn install_script_is_lowered() {
        let template = TemplateImporter::new().import(&foreign_json()).unwrap();
        let script = &template.install_script;

        assert!(script.starts_with("#!/bin/bash\n"), "shebang rewritten: {script}");
        assert!(script.contains("set -e"));
        assert!(script.contains("cd {{SERVER_DIR}}"));
        assert!(!script.contains("[["));
        assert!(script.contains("[ \"$VERSION\" = \"latest\" ]"));
        // No package step in the source, so the preflight block lands.
        assert!(script.contains("apt-get install"));
        assert!(script.contains("ca-certificates"));
    }

    #[test]
    fn builtins_are_synthesized_when_referenced() {
        let template = TemplateImporter::new().import(&foreign_json()).unwrap();
        assert!(template.variable("SERVER_MEMORY").is_some());
        assert!(template.variable("SERVER_PORT").is_some());
        // Not referenced anywhere -> not synthesized.
        assert!(template.variable("TZ").is_none());
    }

    #[test]
    fn yaml_dialect_parses() {
        let yaml = r#"
meta:
  version: PTDL_v2
name: Terraria
docker_images:
  Mono: ghcr.io/images/mono:latest
startup: ./TerrariaServer -port ${SERVER_PORT}
config:
  stop: exit
variables:
  - name: World Name
    env_variable: WORLD_NAME
    default_value: world
    rules: required|string
"#;
        let template = TemplateImporter::new().import(yaml).unwrap();
        assert_eq!(template.name, "Terraria");
        assert_eq!(template.image, "ghcr.io/images/mono:latest");
        assert_eq!(template.stop.command, "exit");
        assert_eq!(template.stop.signal, StopSignal::Sigterm);
        assert_eq!(template.startup, "./TerrariaServer -port {{SERVER_PORT}}");
    }

    #[test]
    fn plain_stop_string_drops_leading_slash() {
        assert_eq!(normalize_stop("/stop").command, "stop");
        assert_eq!(normalize_stop("/stop").signal, StopSignal::Sigterm);
    }

    #[test]
    fn canonical_round_trip_is_identity() {
        let mut canonical = Template::minimal(TemplateId(0), "mc", "game:latest");
        canonical.startup = "java -jar {{SERVER_JARFILE}}".into();
        canonical.variables.push(TemplateVariable {
            name: "SERVER_JARFILE".into(),
            description: "Jar".into(),
            default_value: "server.jar".into(),
            required: true,
            input: VariableInput::Text,
            rules: "required".into(),
        });

        let doc = serde_json::to_string(&canonical).unwrap();
        let reimported = TemplateImporter::new().import(&doc).unwrap();
        assert_eq!(reimported, canonical);
    }

    #[test]
    fn missing_fields_are_reported_as_a_list() {
        let err = TemplateImporter::new()
            .import(r#"{"meta": {"version": "PTDL_v2"}, "docker_images": {}}"#)
            .unwrap_err();
        match err {
            ImportError::MissingFields(fields) => {
                assert!(fields.contains(&"name".to_string()));
                assert!(fields.contains(&"docker_images".to_string()));
                assert!(fields.contains(&"startup".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
