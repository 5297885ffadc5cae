//! Loading and validating the declarative access-control policy.
//!
//! The policy is the single source of truth for what this hook enforces.
//! It is authored by a human and never written by this crate, except
//! indirectly via `hash-token` which prints a value the human pastes in
//! by hand.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HookError, Result};

/// Relative path of the policy file within the repository.
pub const DEFAULT_POLICY_PATH: &str = "config/hook_policy.json";

fn default_log_path() -> String {
   "simlog/precommit_access.log".to_string()
}

fn default_true() -> bool {
   true
}

fn default_max_files_per_group() -> usize {
   20
}

fn default_priority() -> FreezePriority {
   FreezePriority::OverrideAll
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezePriority {
   OverrideAll,
   AfterRestricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmokeMode {
   Warn,
   Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shell {
   Csh,
   Sh,
   None,
}

impl Default for Shell {
   fn default() -> Self {
      Self::None
   }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
   pub label:    String,
   pub sha256:   String,
   #[serde(default)]
   pub reusable: bool,
   #[serde(default)]
   pub expires:  Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options {
   #[serde(default = "default_true")]
   pub case_sensitive_users: bool,
   #[serde(default = "default_true")]
   pub expand_env: bool,
   #[serde(default = "default_true")]
   pub treat_patterns_as_absolute_when_starting_with_slash: bool,
   #[serde(default = "default_log_path")]
   pub log_path: String,
   #[serde(default)]
   pub ui: UiOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiOptions {
   #[serde(default = "default_max_files_per_group")]
   pub max_files_per_group: usize,
}

impl Default for UiOptions {
   fn default() -> Self {
      Self { max_files_per_group: default_max_files_per_group() }
   }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalBypass {
   #[serde(default)]
   pub allowed_extensions: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedEntry {
   pub paths: Vec<String>,
   #[serde(default)]
   pub allowed_extensions: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictedEntry {
   pub paths:              Vec<String>,
   #[serde(default)]
   pub allowed_users:      HashSet<String>,
   #[serde(default)]
   pub allowed_extensions: HashSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmergencyBypass {
   #[serde(default)]
   pub enabled: bool,
   #[serde(default)]
   pub allowed_users: HashSet<String>,
   #[serde(default)]
   pub require_reason: bool,
   #[serde(default)]
   pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreezeWindow {
   #[serde(default)]
   pub from:  Option<String>,
   #[serde(default)]
   pub to:    Option<String>,
   pub paths: Vec<String>,
}

impl FreezeWindow {
   /// A window is well-formed when every bound it declares actually parses;
   /// an absent bound is fine, a present-but-malformed one is not.
   #[must_use]
   pub fn is_well_formed(&self) -> bool {
      let from_ok = self.from.as_deref().is_none_or(|s| crate::bypass::parse_local_timestamp(s).is_some());
      let to_ok = self.to.as_deref().is_none_or(|s| crate::bypass::parse_local_timestamp(s).is_some());
      from_ok && to_ok
   }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Freeze {
   #[serde(default)]
   pub enabled: bool,
   #[serde(default)]
   pub branch: Option<String>,
   #[serde(default)]
   pub windows: Vec<FreezeWindow>,
   #[serde(default)]
   pub allowed_users: HashSet<String>,
   #[serde(default)]
   pub require_reason: bool,
   #[serde(default)]
   pub tokens: Vec<Token>,
   #[serde(default = "default_priority")]
   pub priority: FreezePriority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmokeTest {
   #[serde(default)]
   pub enabled: bool,
   #[serde(default)]
   pub mode: Option<SmokeMode>,
   #[serde(default)]
   pub timeout_sec: Option<u64>,
   #[serde(default)]
   pub shell: Shell,
   #[serde(default)]
   pub setup_script: Option<String>,
   #[serde(default)]
   pub paths_compile_elab: Vec<String>,
   #[serde(default)]
   pub cmds_compile_elab: Vec<Vec<String>>,
   #[serde(default)]
   pub sw_header_globs: Vec<String>,
   #[serde(default)]
   pub cmds_sw: Vec<Vec<String>>,
}

impl SmokeTest {
   #[must_use]
   pub fn mode(&self) -> SmokeMode {
      self.mode.unwrap_or(SmokeMode::Block)
   }

   #[must_use]
   pub fn timeout(&self) -> u64 {
      self.timeout_sec.unwrap_or(120)
   }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
   #[serde(default = "default_version")]
   pub version: u32,
   #[serde(default)]
   pub config_admins: HashSet<String>,
   #[serde(default)]
   pub options: Options,
   #[serde(default)]
   pub global_bypass: GlobalBypass,
   #[serde(default)]
   pub locked: Vec<LockedEntry>,
   #[serde(default)]
   pub restricted: Vec<RestrictedEntry>,
   #[serde(default)]
   pub deletion_protected: Vec<String>,
   #[serde(default)]
   pub emergency_bypass: EmergencyBypass,
   #[serde(default)]
   pub freeze: Freeze,
   #[serde(default)]
   pub smoke_test: SmokeTest,
}

fn default_version() -> u32 {
   1
}

/// A warning collected while validating a policy document; never fatal on
/// its own.
#[derive(Debug, Clone)]
pub struct SchemaWarning(pub String);

impl std::fmt::Display for SchemaWarning {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "{}", self.0)
   }
}

/// Normalize an extension to lowercase with a leading dot.
#[must_use]
pub fn normalize_extension(ext: &str) -> String {
   let trimmed = ext.trim();
   let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
   format!(".{}", trimmed.to_ascii_lowercase())
}

fn normalize_extension_set(set: &HashSet<String>) -> HashSet<String> {
   set.iter().map(|e| normalize_extension(e)).collect()
}

/// Top-level keys are ignored silently for forward compatibility; keys
/// inside the typed objects nested under them are also ignored by `serde`
/// (no `deny_unknown_fields`), but those specifically should be logged, so
/// we re-walk the raw JSON here to find them rather than relying on
/// `serde`'s silent default.
fn check_object_keys(value: &serde_json::Value, known: &[&str], context: &str, warnings: &mut Vec<SchemaWarning>) {
   let Some(obj) = value.as_object() else { return };
   for key in obj.keys() {
      if !known.contains(&key.as_str()) {
         warnings.push(SchemaWarning(format!("unknown key '{key}' in {context}, ignored")));
      }
   }
}

fn warn_unknown_keys(value: &serde_json::Value, warnings: &mut Vec<SchemaWarning>) {
   if let Some(options) = value.get("options") {
      check_object_keys(
         options,
         &["case_sensitive_users", "expand_env", "treat_patterns_as_absolute_when_starting_with_slash", "log_path", "ui"],
         "options",
         warnings,
      );
      if let Some(ui) = options.get("ui") {
         check_object_keys(ui, &["max_files_per_group"], "options.ui", warnings);
      }
   }
   if let Some(global_bypass) = value.get("global_bypass") {
      check_object_keys(global_bypass, &["allowed_extensions"], "global_bypass", warnings);
   }
   if let Some(locked) = value.get("locked").and_then(serde_json::Value::as_array) {
      for entry in locked {
         check_object_keys(entry, &["paths", "allowed_extensions"], "a locked entry", warnings);
      }
   }
   if let Some(restricted) = value.get("restricted").and_then(serde_json::Value::as_array) {
      for entry in restricted {
         check_object_keys(entry, &["paths", "allowed_users", "allowed_extensions"], "a restricted entry", warnings);
      }
   }
   if let Some(emergency) = value.get("emergency_bypass") {
      check_object_keys(emergency, &["enabled", "allowed_users", "require_reason", "tokens"], "emergency_bypass", warnings);
      warn_unknown_token_keys(emergency, "emergency_bypass.tokens", warnings);
   }
   if let Some(freeze) = value.get("freeze") {
      check_object_keys(
         freeze,
         &["enabled", "branch", "windows", "allowed_users", "require_reason", "tokens", "priority"],
         "freeze",
         warnings,
      );
      warn_unknown_token_keys(freeze, "freeze.tokens", warnings);
      if let Some(windows) = freeze.get("windows").and_then(serde_json::Value::as_array) {
         for window in windows {
            check_object_keys(window, &["from", "to", "paths"], "a freeze window", warnings);
         }
      }
   }
   if let Some(smoke) = value.get("smoke_test") {
      check_object_keys(
         smoke,
         &[
            "enabled",
            "mode",
            "timeout_sec",
            "shell",
            "setup_script",
            "paths_compile_elab",
            "cmds_compile_elab",
            "sw_header_globs",
            "cmds_sw",
         ],
         "smoke_test",
         warnings,
      );
   }
}

fn warn_unknown_token_keys(scope: &serde_json::Value, context: &str, warnings: &mut Vec<SchemaWarning>) {
   if let Some(tokens) = scope.get("tokens").and_then(serde_json::Value::as_array) {
      for token in tokens {
         check_object_keys(token, &["label", "sha256", "reusable", "expires"], context, warnings);
      }
   }
}

impl Policy {
   /// Load the policy from `path`, applying defaults and normalizing
   /// extension sets. Returns schema warnings for anything non-fatal that
   /// should be surfaced to the operator.
   pub fn load(path: &Path) -> Result<(Self, Vec<SchemaWarning>)> {
      if !path.exists() {
         return Err(HookError::PolicyNotFound(path.display().to_string()));
      }
      let raw = std::fs::read_to_string(path)?;
      let mut policy: Self = serde_json::from_str(&raw)
         .map_err(|source| HookError::PolicyParse { path: path.display().to_string(), source })?;

      let mut warnings = Vec::new();
      if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
         warn_unknown_keys(&value, &mut warnings);
      }
      policy.normalize(&mut warnings);
      policy.validate(&mut warnings)?;
      Ok((policy, warnings))
   }

   /// Resolve the policy path for the repository rooted at `repo_root`,
   /// honoring `DV_HOOK_POLICY_PATH`.
   #[must_use]
   pub fn path_for(repo_root: &Path) -> PathBuf {
      if let Ok(custom) = std::env::var("DV_HOOK_POLICY_PATH") {
         let custom = PathBuf::from(custom);
         if custom.is_absolute() {
            return custom;
         }
         return repo_root.join(custom);
      }
      repo_root.join(DEFAULT_POLICY_PATH)
   }

   fn normalize(&mut self, warnings: &mut Vec<SchemaWarning>) {
      self.global_bypass.allowed_extensions = normalize_extension_set(&self.global_bypass.allowed_extensions);
      for entry in &mut self.locked {
         entry.allowed_extensions = normalize_extension_set(&entry.allowed_extensions);
      }
      for entry in &mut self.restricted {
         entry.allowed_extensions = normalize_extension_set(&entry.allowed_extensions);
      }
      if self.version != 1 {
         warnings.push(SchemaWarning(format!(
            "unrecognized policy version {}, proceeding as v1",
            self.version
         )));
      }
   }

   fn validate(&self, warnings: &mut Vec<SchemaWarning>) -> Result<()> {
      for token in self.freeze.tokens.iter().chain(self.emergency_bypass.tokens.iter()) {
         if token.sha256.len() != 64 || !token.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HookError::PolicySchema(format!(
               "token '{}' has a malformed sha256 (expected 64 hex chars)",
               token.label
            )));
         }
         if let Some(expires) = &token.expires
            && crate::bypass::parse_local_timestamp(expires).is_none()
         {
            warnings.push(SchemaWarning(format!(
               "token '{}' has an unparseable expires timestamp '{expires}', rejecting token rather than treating it as never-expiring",
               token.label
            )));
         }
      }
      for window in &self.freeze.windows {
         if !window.is_well_formed() {
            warnings.push(SchemaWarning(format!(
               "freeze window covering {:?} has an unparseable from/to timestamp, skipping it entirely",
               window.paths
            )));
         }
      }
      if self.locked.is_empty() && self.restricted.is_empty() && self.deletion_protected.is_empty() {
         warnings.push(SchemaWarning(
            "policy declares no locked, restricted, or deletion_protected rules, everything defaults to Allow".to_string(),
         ));
      }
      Ok(())
   }
}
