// SPDX-License-Identifier: MIT

//! Vendor descriptors, command templates, and layered model resolution
//! (spec §4.9, §4.6 `config.json`).

use corral_core::{AgentType, Effort, Mode};
use corral_storage::{atomic_write_json, read_json_tolerant, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Whether the vendor expects `$ARGUMENTS` or `{{args}}` style substitution
/// in places outside our own `{prompt}`/`{model}` placeholders. Informational
/// only — our own templates always use `{prompt}`/`{model}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSyntax {
    DollarArguments,
    DoubleBraceArgs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub mcp: bool,
    #[serde(default)]
    pub hooks: bool,
    #[serde(default)]
    pub skills: bool,
    #[serde(default)]
    pub allowlist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTable {
    pub fast: String,
    pub default: String,
    pub detailed: String,
}

impl ModelTable {
    pub fn get(&self, effort: Effort) -> &str {
        match effort {
            Effort::Fast => &self.fast,
            Effort::Default => &self.default,
            Effort::Detailed => &self.detailed,
        }
    }
}

/// Static per-vendor descriptor: binary name, argument template, capability
/// flags, and mode-specific flags (spec §4.9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorDescriptor {
    pub cli_command: String,
    pub command_template: Vec<String>,
    pub variable_syntax: VariableSyntax,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub plan_flags: Vec<String>,
    #[serde(default)]
    pub edit_flags: Vec<String>,
    #[serde(default)]
    pub ralph_flags: Vec<String>,
    pub models: ModelTable,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Captures stderr into a sibling `stderr.log` instead of discarding it
    /// (spec §9 open question: stderr is never mixed into the event stream).
    /// Off unless a vendor is known to emit diagnostics there.
    #[serde(default)]
    pub capture_stderr: bool,
}

fn default_enabled() -> bool {
    true
}

fn model_table(fast: &str, default: &str, detailed: &str) -> ModelTable {
    ModelTable {
        fast: fast.to_string(),
        default: default.to_string(),
        detailed: detailed.to_string(),
    }
}

/// Built-in descriptors for the six vendors named in the spec. `config.json`
/// may override any field; unknown vendors in the file are ignored.
pub fn default_descriptors() -> BTreeMap<String, VendorDescriptor> {
    let mut map = BTreeMap::new();
    map.insert(
        "claude".to_string(),
        VendorDescriptor {
            cli_command: "claude".to_string(),
            command_template: vec![
                "-p".to_string(),
                "{prompt}".to_string(),
                "--model".to_string(),
                "{model}".to_string(),
            ],
            variable_syntax: VariableSyntax::DollarArguments,
            capabilities: Capabilities {
                mcp: true,
                hooks: true,
                skills: true,
                allowlist: true,
            },
            plan_flags: vec![],
            edit_flags: vec!["--permission-mode".to_string(), "acceptEdits".to_string()],
            ralph_flags: vec!["--dangerously-skip-permissions".to_string()],
            models: model_table("haiku", "sonnet", "opus"),
            provider: Some("anthropic".to_string()),
            enabled: true,
            capture_stderr: true,
        },
    );
    map.insert(
        "codex".to_string(),
        VendorDescriptor {
            cli_command: "codex".to_string(),
            command_template: vec!["exec".to_string(), "{prompt}".to_string()],
            variable_syntax: VariableSyntax::DollarArguments,
            capabilities: Capabilities {
                mcp: true,
                hooks: false,
                skills: false,
                allowlist: true,
            },
            plan_flags: vec![],
            edit_flags: vec!["--full-auto".to_string()],
            ralph_flags: vec![
                "--full-auto".to_string(),
                "--dangerously-bypass-approvals-and-sandbox".to_string(),
            ],
            models: model_table("o4-mini", "gpt-5", "gpt-5-high"),
            provider: Some("openai".to_string()),
            enabled: true,
            capture_stderr: true,
        },
    );
    map.insert(
        "gemini".to_string(),
        VendorDescriptor {
            cli_command: "gemini".to_string(),
            command_template: vec!["-p".to_string(), "{prompt}".to_string()],
            variable_syntax: VariableSyntax::DollarArguments,
            capabilities: Capabilities {
                mcp: true,
                hooks: false,
                skills: false,
                allowlist: false,
            },
            plan_flags: vec![],
            edit_flags: vec!["--yolo".to_string()],
            ralph_flags: vec!["--yolo".to_string()],
            models: model_table("gemini-flash", "gemini-pro", "gemini-pro"),
            provider: Some("google".to_string()),
            enabled: true,
            capture_stderr: false,
        },
    );
    map.insert(
        "cursor".to_string(),
        VendorDescriptor {
            cli_command: "cursor-agent".to_string(),
            command_template: vec!["-p".to_string(), "{prompt}".to_string()],
            variable_syntax: VariableSyntax::DollarArguments,
            capabilities: Capabilities {
                mcp: true,
                hooks: false,
                skills: false,
                allowlist: true,
            },
            plan_flags: vec![],
            edit_flags: vec!["--force".to_string()],
            ralph_flags: vec!["--force".to_string()],
            models: model_table("auto", "auto", "auto"),
            provider: Some("cursor".to_string()),
            enabled: true,
            capture_stderr: false,
        },
    );
    map.insert(
        "opencode".to_string(),
        VendorDescriptor {
            cli_command: "opencode".to_string(),
            command_template: vec!["run".to_string(), "{prompt}".to_string()],
            variable_syntax: VariableSyntax::DoubleBraceArgs,
            capabilities: Capabilities::default(),
            plan_flags: vec![],
            edit_flags: vec![],
            ralph_flags: vec![],
            models: model_table("default", "default", "default"),
            provider: None,
            enabled: true,
            capture_stderr: false,
        },
    );
    map.insert(
        "trae".to_string(),
        VendorDescriptor {
            cli_command: "trae".to_string(),
            command_template: vec!["{prompt}".to_string()],
            variable_syntax: VariableSyntax::DoubleBraceArgs,
            capabilities: Capabilities::default(),
            plan_flags: vec![],
            edit_flags: vec![],
            ralph_flags: vec![],
            models: model_table("default", "default", "default"),
            provider: None,
            enabled: true,
            capture_stderr: false,
        },
    );
    map
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "apiEndpoint")]
    pub api_endpoint: String,
}

/// Root shape of `config.json` (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agents: BTreeMap<String, VendorDescriptor>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Config {
    pub fn defaults() -> Self {
        Self {
            agents: default_descriptors(),
            providers: BTreeMap::new(),
        }
    }

    pub fn enabled_vendors(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|(_, d)| d.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn descriptor(&self, vendor: &str) -> Option<&VendorDescriptor> {
        self.agents.get(vendor)
    }

    pub fn is_enabled(&self, vendor: &AgentType) -> bool {
        self.agents.get(vendor).map(|d| d.enabled).unwrap_or(false)
    }
}

/// Load `config.json`, migrating a legacy one-key-per-enabled-agent file
/// and filling missing fields from defaults. Writes the defaults out if no
/// file exists yet (spec §4.6).
pub fn load_or_init(path: &Path) -> Result<Config, StorageError> {
    if let Some(config) = read_json_tolerant::<Config>(path) {
        return Ok(merge_with_defaults(config));
    }
    if let Some(legacy) = read_json_tolerant::<serde_json::Value>(path) {
        let migrated = migrate_legacy(&legacy);
        atomic_write_json(path, &migrated)?;
        return Ok(migrated);
    }
    let defaults = Config::defaults();
    atomic_write_json(path, &defaults)?;
    Ok(defaults)
}

/// Fills any vendor missing from the loaded config with its built-in
/// descriptor, and ignores vendors not in the built-in set.
fn merge_with_defaults(mut config: Config) -> Config {
    let defaults = default_descriptors();
    config.agents.retain(|name, _| defaults.contains_key(name));
    for (name, descriptor) in defaults {
        config.agents.entry(name).or_insert(descriptor);
    }
    config
}

/// Migrates `{"claude": true, "codex": false, ...}` into the current shape,
/// keeping each vendor's other defaults untouched aside from `enabled`.
fn migrate_legacy(legacy: &serde_json::Value) -> Config {
    let mut config = Config::defaults();
    if let Some(obj) = legacy.as_object() {
        for (vendor, enabled) in obj {
            if let Some(descriptor) = config.agents.get_mut(vendor) {
                if let Some(flag) = enabled.as_bool() {
                    descriptor.enabled = flag;
                }
            }
        }
    }
    config
}

/// Layered model-override table (spec §4.5 `set_model_overrides`):
/// `resolve(effort, vendor) = overrides[vendor][effort] ?? defaults[effort][vendor]`.
/// Empty-string overrides are ignored.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    table: BTreeMap<String, BTreeMap<String, String>>,
}

impl ModelOverrides {
    pub fn set(&mut self, vendor: &str, effort: Effort, model: &str) {
        if model.is_empty() {
            return;
        }
        self.table
            .entry(vendor.to_string())
            .or_default()
            .insert(effort.as_str().to_string(), model.to_string());
    }

    pub fn resolve<'a>(&'a self, config: &'a Config, vendor: &str, effort: Effort) -> Option<&'a str> {
        if let Some(model) = self
            .table
            .get(vendor)
            .and_then(|by_effort| by_effort.get(effort.as_str()))
        {
            return Some(model.as_str());
        }
        config.descriptor(vendor).map(|d| d.models.get(effort))
    }
}

/// Default ralph-mode preamble referencing `RALPH.md` in the agent's `cwd`
/// (spec §4.4), overridable via `AGENTS_MCP_RALPH_FILE`.
pub fn ralph_preamble(ralph_file: &str) -> String {
    format!(
        "Follow the autonomous loop instructions in {ralph_file} in your working directory before responding to the task below.\n\n"
    )
}

/// Builds the full argv for spawning `vendor` in `mode` at `effort`
/// (spec §4.4, §4.9): substitutes `{prompt}` and `{model}` into the
/// template, then appends the mode-specific flags.
///
/// The prompt is substituted verbatim, not shell-escaped: `spawn_child`
/// execs the vendor binary directly (no intervening shell), so each argv
/// element already reaches the child exactly as built here.
pub fn build_command(
    descriptor: &VendorDescriptor,
    mode: Mode,
    model: &str,
    prompt: &str,
    ralph_file: &str,
) -> Vec<String> {
    let effective_prompt = if mode == Mode::Ralph {
        format!("{}{}", ralph_preamble(ralph_file), prompt)
    } else {
        prompt.to_string()
    };

    let mut argv = vec![descriptor.cli_command.clone()];
    for token in &descriptor.command_template {
        let substituted = token
            .replace("{prompt}", &effective_prompt)
            .replace("{model}", model);
        argv.push(substituted);
    }

    let mode_flags = match mode {
        Mode::Plan => &descriptor.plan_flags,
        Mode::Edit => &descriptor.edit_flags,
        Mode::Ralph => &descriptor.ralph_flags,
    };
    argv.extend(mode_flags.iter().cloned());
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_cover_all_six_vendors() {
        let defaults = default_descriptors();
        for vendor in ["claude", "codex", "gemini", "cursor", "opencode", "trae"] {
            assert!(defaults.contains_key(vendor), "missing {vendor}");
        }
    }

    #[test]
    fn load_or_init_writes_defaults_when_no_file_exists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        assert!(!path.exists());
        let config = load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.enabled_vendors().len(), 6);
    }

    #[test]
    fn legacy_one_key_file_is_migrated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"claude": true, "codex": false}"#).unwrap();
        let config = load_or_init(&path).unwrap();
        assert!(config.is_enabled(&"claude".to_string()));
        assert!(!config.is_enabled(&"codex".to_string()));
        // Untouched vendors keep their built-in default (enabled).
        assert!(config.is_enabled(&"gemini".to_string()));
    }

    #[test]
    fn unknown_vendor_in_file_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        let mut config = Config::defaults();
        config.agents.insert(
            "not_a_real_cli".to_string(),
            config.agents.get("claude").unwrap().clone(),
        );
        atomic_write_json(&path, &config).unwrap();
        let reloaded = load_or_init(&path).unwrap();
        assert!(!reloaded.agents.contains_key("not_a_real_cli"));
    }

    #[test]
    fn model_override_layers_over_default() {
        let config = Config::defaults();
        let mut overrides = ModelOverrides::default();
        assert_eq!(
            overrides.resolve(&config, "claude", Effort::Fast),
            Some("haiku")
        );
        overrides.set("claude", Effort::Fast, "custom-fast-model");
        assert_eq!(
            overrides.resolve(&config, "claude", Effort::Fast),
            Some("custom-fast-model")
        );
    }

    #[test]
    fn empty_string_override_is_ignored() {
        let mut overrides = ModelOverrides::default();
        overrides.set("claude", Effort::Fast, "");
        let config = Config::defaults();
        assert_eq!(
            overrides.resolve(&config, "claude", Effort::Fast),
            Some("haiku")
        );
    }

    #[test]
    fn build_command_passes_prompt_verbatim_as_one_argv_element() {
        let descriptor = default_descriptors().remove("claude").unwrap();
        let argv = build_command(&descriptor, Mode::Edit, "sonnet", "it's a bug", "RALPH.md");
        let prompt_arg = &argv[2];
        assert_eq!(prompt_arg, "it's a bug");
    }

    #[test]
    fn ralph_mode_prepends_preamble_and_uses_ralph_flags() {
        let descriptor = default_descriptors().remove("codex").unwrap();
        let argv = build_command(&descriptor, Mode::Ralph, "gpt-5", "do the thing", "RALPH.md");
        assert!(argv[2].contains("RALPH.md"));
        assert!(argv.iter().any(|a| a == "--dangerously-bypass-approvals-and-sandbox"));
    }

    #[test]
    fn plan_mode_omits_full_auto_but_edit_includes_it() {
        let descriptor = default_descriptors().remove("codex").unwrap();
        let plan_argv = build_command(&descriptor, Mode::Plan, "gpt-5", "p", "RALPH.md");
        let edit_argv = build_command(&descriptor, Mode::Edit, "gpt-5", "p", "RALPH.md");
        assert!(!plan_argv.iter().any(|a| a == "--full-auto"));
        assert!(edit_argv.iter().any(|a| a == "--full-auto"));
    }
}
