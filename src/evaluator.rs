//! The seven-step precedence pipeline that turns a `Change` into a single
//! `Verdict`.
//!
//! Each step is a function returning `Option<Verdict>`; the pipeline takes
//! the first `Some`. This mirrors a policy-chain shape rather than one long
//! nested `match`, so each rule can be read (and tested) independently.

use std::path::Path;

use chrono::NaiveDateTime;

use crate::changes::{Change, Status};
use crate::patterns::{self, CompiledPattern};
use crate::policy::{FreezePriority, Policy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
   Allow,
   Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rule {
   PolicyEdit,
   Freeze,
   DeletionProtected,
   GlobalExt,
   Locked,
   Restricted,
   Default,
}

impl Rule {
   #[must_use]
   pub fn as_str(self) -> &'static str {
      match self {
         Self::PolicyEdit => "policy_edit",
         Self::Freeze => "freeze",
         Self::DeletionProtected => "deletion_protected",
         Self::GlobalExt => "global_ext",
         Self::Locked => "locked",
         Self::Restricted => "restricted",
         Self::Default => "default",
      }
   }
}

#[derive(Debug, Clone)]
pub struct Verdict {
   pub decision: Decision,
   pub rule:     Rule,
   pub detail:   String,
}

impl Verdict {
   fn allow(rule: Rule, detail: impl Into<String>) -> Self {
      Self { decision: Decision::Allow, rule, detail: detail.into() }
   }

   fn block(rule: Rule, detail: impl Into<String>) -> Self {
      Self { decision: Decision::Block, rule, detail: detail.into() }
   }
}

/// Compiled policy ready for repeated per-change evaluation, built once per
/// invocation from the parsed `Policy`.
pub struct CompiledPolicy<'a> {
   policy:             &'a Policy,
   locked:             Vec<(Vec<CompiledPattern>, &'a crate::policy::LockedEntry)>,
   restricted:         Vec<(Vec<CompiledPattern>, &'a crate::policy::RestrictedEntry)>,
   deletion_protected: Vec<CompiledPattern>,
   freeze_windows:     Vec<(Vec<CompiledPattern>, &'a crate::policy::FreezeWindow)>,
}

impl<'a> CompiledPolicy<'a> {
   #[must_use]
   pub fn compile(policy: &'a Policy) -> Self {
      let expand = policy.options.expand_env;
      let abs = policy.options.treat_patterns_as_absolute_when_starting_with_slash;

      let locked = policy
         .locked
         .iter()
         .map(|entry| (patterns::compile_all(&entry.paths, expand, abs).0, entry))
         .collect();
      let restricted = policy
         .restricted
         .iter()
         .map(|entry| (patterns::compile_all(&entry.paths, expand, abs).0, entry))
         .collect();
      let deletion_protected = patterns::compile_all(&policy.deletion_protected, expand, abs).0;
      let freeze_windows = policy
         .freeze
         .windows
         .iter()
         .filter(|window| window.is_well_formed())
         .map(|window| (patterns::compile_all(&window.paths, expand, abs).0, window))
         .collect();

      Self { policy, locked, restricted, deletion_protected, freeze_windows }
   }
}

fn user_eq(policy: &Policy, a: &str, b: &str) -> bool {
   if policy.options.case_sensitive_users {
      a == b
   } else {
      a.eq_ignore_ascii_case(b)
   }
}

fn user_in(policy: &Policy, set: &std::collections::HashSet<String>, user: &str) -> bool {
   set.iter().any(|candidate| user_eq(policy, candidate, user))
}

fn any_matches(patterns: &[CompiledPattern], repo_root: &Path, path: &Path) -> bool {
   patterns.iter().any(|p| p.matches(repo_root, path))
}

fn extension_allowed(path: &Path, allowed: &std::collections::HashSet<String>) -> bool {
   patterns::extension_of(path).is_some_and(|ext| allowed.contains(&ext))
}

/// Evaluate the precedence pipeline for a single change.
pub fn evaluate(compiled: &CompiledPolicy<'_>, repo_root: &Path, change: &Change, user: &str, now: NaiveDateTime) -> Verdict {
   let policy = compiled.policy;
   let effective = change.effective_paths();

   if let Some(v) = step_policy_edit(policy, &effective, user) {
      return v;
   }

   if policy.freeze.priority == FreezePriority::OverrideAll
      && let Some(v) = step_freeze(compiled, repo_root, &effective, user, now)
   {
      return v;
   }

   if let Some(v) = step_deletion_protected(compiled, repo_root, change, user) {
      return v;
   }

   if let Some(v) = step_global_ext(policy, change) {
      return v;
   }

   if let Some(v) = step_locked(compiled, repo_root, change) {
      return v;
   }

   if let Some(v) = step_restricted(compiled, repo_root, change, user) {
      return v;
   }

   if policy.freeze.priority == FreezePriority::AfterRestricted
      && let Some(v) = step_freeze(compiled, repo_root, &effective, user, now)
   {
      return v;
   }

   Verdict::allow(Rule::Default, "no rule matched")
}

fn step_policy_edit(policy: &Policy, effective: &crate::changes::EffectivePaths, user: &str) -> Option<Verdict> {
   let touches_policy = [&effective.old, &effective.new]
      .into_iter()
      .flatten()
      .any(|p| p.to_string_lossy() == crate::policy::DEFAULT_POLICY_PATH);
   if touches_policy && !user_in(policy, &policy.config_admins, user) {
      return Some(Verdict::block(Rule::PolicyEdit, "policy file may only be edited by a config admin"));
   }
   None
}

fn step_freeze(
   compiled: &CompiledPolicy<'_>,
   repo_root: &Path,
   effective: &crate::changes::EffectivePaths,
   _user: &str,
   now: NaiveDateTime,
) -> Option<Verdict> {
   if !compiled.policy.freeze.enabled {
      return None;
   }
   for (patterns, window) in &compiled.freeze_windows {
      if !window_active(window, now) {
         continue;
      }
      let hits = [&effective.old, &effective.new]
         .into_iter()
         .flatten()
         .any(|p| any_matches(patterns, repo_root, p));
      if hits {
         return Some(Verdict::block(Rule::Freeze, "path is frozen for the active window"));
      }
   }
   None
}

/// Windows reaching this point have already passed `FreezeWindow::is_well_formed`
/// at load time, so a present bound always parses; an absent bound leaves
/// that side open.
fn window_active(window: &crate::policy::FreezeWindow, now: NaiveDateTime) -> bool {
   let from_ok = window.from.as_deref().and_then(crate::bypass::parse_local_timestamp).is_none_or(|f| now >= f);
   let to_ok = window.to.as_deref().and_then(crate::bypass::parse_local_timestamp).is_none_or(|t| now <= t);
   from_ok && to_ok
}

fn step_deletion_protected(compiled: &CompiledPolicy<'_>, repo_root: &Path, change: &Change, user: &str) -> Option<Verdict> {
   let old_side = match change.status {
      Status::Deleted | Status::Renamed | Status::Copied => change.old_path.as_deref(),
      _ => None,
   };
   let old_side = old_side?;
   if !any_matches(&compiled.deletion_protected, repo_root, old_side) {
      return None;
   }
   if user_in(compiled.policy, &compiled.policy.config_admins, user) {
      return None;
   }
   Some(Verdict::block(Rule::DeletionProtected, "deletion of a protected path requires an admin"))
}

fn step_global_ext(policy: &Policy, change: &Change) -> Option<Verdict> {
   if change.status == Status::Deleted {
      return None;
   }
   let new_path = change.new_path.as_deref()?;
   if extension_allowed(new_path, &policy.global_bypass.allowed_extensions) {
      return Some(Verdict::allow(Rule::GlobalExt, "extension is globally allowed"));
   }
   None
}

fn step_locked(compiled: &CompiledPolicy<'_>, repo_root: &Path, change: &Change) -> Option<Verdict> {
   let new_path = change.new_path.as_deref()?;
   for (patterns, entry) in &compiled.locked {
      if any_matches(patterns, repo_root, new_path) {
         if extension_allowed(new_path, &entry.allowed_extensions) {
            return None;
         }
         return Some(Verdict::block(Rule::Locked, "path is locked"));
      }
   }
   None
}

fn step_restricted(compiled: &CompiledPolicy<'_>, repo_root: &Path, change: &Change, user: &str) -> Option<Verdict> {
   let new_path = change.new_path.as_deref()?;
   for (patterns, entry) in &compiled.restricted {
      if !any_matches(patterns, repo_root, new_path) {
         continue;
      }
      if user_in(compiled.policy, &entry.allowed_users, user) {
         return Some(Verdict::allow(Rule::Restricted, "user is on the allowed list"));
      }
      if extension_allowed(new_path, &entry.allowed_extensions) {
         return Some(Verdict::allow(Rule::Restricted, "extension is allowed for this path"));
      }
      return Some(Verdict::block(Rule::Restricted, "path is restricted"));
   }
   None
}
