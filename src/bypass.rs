//! Freeze and emergency bypass resolution.
//!
//! Two independent scopes, each keyed by a SHA-256-hashed secret presented
//! via `DV_HOOK_BYPASS`. Reusable tokens validate purely against the policy;
//! one-time tokens additionally consult (and then update) the ledger.

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

use crate::evaluator::{Decision, Rule, Verdict};
use crate::ledger::{Ledger, LedgerEntry};
use crate::policy::{Policy, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
   Freeze,
   Emergency,
}

impl Scope {
   #[must_use]
   pub fn as_str(self) -> &'static str {
      match self {
         Self::Freeze => "freeze",
         Self::Emergency => "emergency",
      }
   }
}

#[derive(Debug)]
pub enum BypassOutcome {
   /// No attempt was made: the scope is disabled, or there was nothing for
   /// it to clear.
   NotAttempted,
   /// Succeeded; the indices of the cleared verdicts are returned so the
   /// caller can flip them in place.
   Cleared { cleared_indices: Vec<usize>, reason: Option<String>, token_label: String },
   /// A token was presented but rejected (wrong user, wrong hash, expired,
   /// or already consumed).
   Rejected { why: String },
}

/// Parse the local wall-clock timestamp format used throughout the policy
/// (`YYYY-MM-DD HH:MM:SS`, no timezone).
#[must_use]
pub fn parse_local_timestamp(s: &str) -> Option<NaiveDateTime> {
   NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok()
}

fn hash_token(secret: &str) -> String {
   let mut hasher = Sha256::new();
   hasher.update(secret.as_bytes());
   let digest = hasher.finalize();
   digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn find_token<'a>(tokens: &'a [Token], hash: &str) -> Option<&'a Token> {
   tokens.iter().find(|t| t.sha256.eq_ignore_ascii_case(hash))
}

fn user_allowed(policy: &Policy, allowed: &std::collections::HashSet<String>, user: &str) -> bool {
   let cmp = |a: &str, b: &str| {
      if policy.options.case_sensitive_users { a == b } else { a.eq_ignore_ascii_case(b) }
   };
   allowed.iter().any(|candidate| cmp(candidate, user))
}

struct ScopeConfig<'a> {
   enabled:        bool,
   allowed_users:  &'a std::collections::HashSet<String>,
   require_reason: bool,
   tokens:         &'a [Token],
}

fn scope_config<'a>(policy: &'a Policy, scope: Scope) -> ScopeConfig<'a> {
   match scope {
      Scope::Freeze => ScopeConfig {
         enabled:        policy.freeze.enabled,
         allowed_users:  &policy.freeze.allowed_users,
         require_reason: policy.freeze.require_reason,
         tokens:         &policy.freeze.tokens,
      },
      Scope::Emergency => ScopeConfig {
         enabled:        policy.emergency_bypass.enabled,
         allowed_users:  &policy.emergency_bypass.allowed_users,
         require_reason: policy.emergency_bypass.require_reason,
         tokens:         &policy.emergency_bypass.tokens,
      },
   }
}

/// Which rules a given scope is permitted to clear: freeze only clears
/// Freeze, emergency only clears the other bypassable rules; `PolicyEdit` is
/// never cleared by anything.
fn clears(scope: Scope, rule: Rule) -> bool {
   match scope {
      Scope::Freeze => rule == Rule::Freeze,
      Scope::Emergency => matches!(rule, Rule::DeletionProtected | Rule::Locked | Rule::Restricted),
   }
}

/// Attempt to resolve `scope` against the current set of verdicts. Mutates
/// nothing; the caller applies `Cleared { cleared_indices }` themselves and
/// is responsible for persisting the ledger entry this function returns
/// alongside `Cleared`.
#[allow(clippy::too_many_arguments, reason = "the resolver needs every one of these inputs to make a safe decision")]
pub fn try_bypass(
   policy: &Policy,
   ledger: &Ledger,
   scope: Scope,
   verdicts: &[Verdict],
   user: &str,
   token_secret: Option<&str>,
   reason: Option<&str>,
   now: NaiveDateTime,
) -> (BypassOutcome, Option<LedgerEntry>) {
   let cfg = scope_config(policy, scope);
   if !cfg.enabled {
      return (BypassOutcome::NotAttempted, None);
   }

   let target_indices: Vec<usize> = verdicts
      .iter()
      .enumerate()
      .filter(|(_, v)| v.decision == Decision::Block && clears(scope, v.rule))
      .map(|(i, _)| i)
      .collect();
   if target_indices.is_empty() {
      return (BypassOutcome::NotAttempted, None);
   }

   let Some(secret) = token_secret else {
      return (BypassOutcome::Rejected { why: "no bypass token presented".to_string() }, None);
   };

   if !user_allowed(policy, cfg.allowed_users, user) {
      return (BypassOutcome::Rejected { why: format!("user '{user}' is not authorized for {} bypass", scope.as_str()) }, None);
   }

   if cfg.require_reason && reason.is_none_or(str::is_empty) {
      return (BypassOutcome::Rejected { why: "a reason is required for this bypass".to_string() }, None);
   }

   let hash = hash_token(secret);
   let Some(token) = find_token(cfg.tokens, &hash) else {
      return (BypassOutcome::Rejected { why: "token does not match any configured token".to_string() }, None);
   };

   if let Some(expires) = &token.expires {
      match parse_local_timestamp(expires) {
         Some(expiry) if now >= expiry => {
            return (BypassOutcome::Rejected { why: format!("token '{}' expired at {expires}", token.label) }, None);
         },
         None => {
            return (BypassOutcome::Rejected { why: format!("token '{}' has an unparseable expiry; rejecting", token.label) }, None);
         },
         _ => {},
      }
   }

   if !token.reusable && ledger.has_consumed(scope, &hash) {
      let replay_entry = LedgerEntry {
         ts:          now,
         user:        user.to_string(),
         scope:       scope.as_str().to_string(),
         label:       token.label.clone(),
         hash_prefix: hash[..12].to_string(),
         reusable:    token.reusable,
         reason:      reason.map(str::to_string),
         files:       target_indices.iter().map(|i| verdicts[*i].detail.clone()).collect(),
         result:      "replayed_denied".to_string(),
      };
      return (
         BypassOutcome::Rejected { why: format!("token '{}' is one-time and has already been used", token.label) },
         Some(replay_entry),
      );
   }

   let entry = LedgerEntry {
      ts:          now,
      user:        user.to_string(),
      scope:       scope.as_str().to_string(),
      label:       token.label.clone(),
      hash_prefix: hash[..12].to_string(),
      reusable:    token.reusable,
      reason:      reason.map(str::to_string),
      files:       target_indices.iter().map(|i| verdicts[*i].detail.clone()).collect(),
      result:      "consumed".to_string(),
   };

   (
      BypassOutcome::Cleared { cleared_indices: target_indices, reason: reason.map(str::to_string), token_label: token.label.clone() },
      Some(entry),
   )
}
