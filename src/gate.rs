//! Orchestrates the full pre-commit pipeline: policy → changes → evaluator
//! → bypass resolver → smoke gate → presenter.
//!
//! Kept separate from `main.rs` so integration tests can drive the pipeline
//! directly against a scratch repository without spawning the binary.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::audit::AuditLog;
use crate::bypass::{self, BypassOutcome, Scope};
use crate::changes::Change;
use crate::error::Result;
use crate::evaluator::{CompiledPolicy, Decision, Verdict};
use crate::ledger::Ledger;
use crate::policy::Policy;
use crate::report::{self, ReportedVerdict};
use crate::smoke;

/// Everything the gate needs that would otherwise come from the live
/// environment, gathered up front so the pipeline itself is a pure function
/// of its inputs (testable without mocking globals).
pub struct GateInputs {
   pub repo_root:     PathBuf,
   pub git_dir:       PathBuf,
   pub user:          String,
   pub now:           NaiveDateTime,
   pub bypass_token:  Option<String>,
   pub bypass_reason: Option<String>,
}

/// Run the full pipeline and return the process exit code.
pub fn run(policy: &Policy, changes: &[Change], inputs: &GateInputs) -> Result<i32> {
   let compiled = CompiledPolicy::compile(policy);
   let mut verdicts: Vec<Verdict> =
      changes.iter().map(|c| crate::evaluator::evaluate(&compiled, &inputs.repo_root, c, &inputs.user, inputs.now)).collect();

   let log_path = inputs.repo_root.join(&policy.options.log_path);
   let audit = AuditLog::new(&log_path);

   let ledger_path = Ledger::path_for(&inputs.git_dir);
   let ledger = Ledger::load(&ledger_path);

   let mut bypass_scopes: Vec<Option<&'static str>> = vec![None; verdicts.len()];

   if verdicts.iter().any(|v| v.decision == Decision::Block) {
      apply_scope(
         policy,
         &ledger_path,
         &ledger,
         Scope::Freeze,
         &mut verdicts,
         &mut bypass_scopes,
         inputs,
         &audit,
      )?;
      let ledger = Ledger::load(&ledger_path);
      apply_scope(
         policy,
         &ledger_path,
         &ledger,
         Scope::Emergency,
         &mut verdicts,
         &mut bypass_scopes,
         inputs,
         &audit,
      )?;
   }

   for ((change, verdict), scope) in changes.iter().zip(verdicts.iter()).zip(bypass_scopes.iter()) {
      audit.record_verdict(inputs.now, &inputs.user, change, verdict, *scope)?;
   }

   let any_blocked = verdicts.iter().any(|v| v.decision == Decision::Block);

   let mut smoke_failed = false;
   let mut smoke_warned = false;
   if !any_blocked {
      let changed_paths: Vec<PathBuf> = changes
         .iter()
         .filter(|c| c.status != crate::changes::Status::Deleted)
         .filter_map(|c| c.new_path.clone())
         .collect();
      let smoke_log = inputs.repo_root.join(smoke::SMOKE_LOG_RELATIVE_PATH);
      let run = smoke::run_if_triggered(&policy.smoke_test, &inputs.repo_root, &changed_paths, &smoke_log)?;
      if run.ran && !run.all_passed() {
         if smoke::should_block(&policy.smoke_test, &run) {
            smoke_failed = true;
         } else {
            smoke_warned = true;
         }
         audit.record_line(inputs.now, &format!("smoke gate reported failures (block={smoke_failed})"))?;
      }
   }

   let reported: Vec<ReportedVerdict<'_>> = changes
      .iter()
      .zip(verdicts.iter())
      .zip(bypass_scopes.iter())
      .map(|((change, verdict), scope)| ReportedVerdict { change, verdict, bypass_scope: *scope })
      .collect();

   Ok(report::present(&reported, smoke_failed, smoke_warned, &policy.options.ui))
}

#[allow(clippy::too_many_arguments, reason = "internal helper threading the pipeline's full state through one bypass attempt")]
fn apply_scope(
   policy: &Policy,
   ledger_path: &Path,
   ledger: &Ledger,
   scope: Scope,
   verdicts: &mut [Verdict],
   bypass_scopes: &mut [Option<&'static str>],
   inputs: &GateInputs,
   audit: &AuditLog<'_>,
) -> Result<()> {
   let (outcome, entry) = bypass::try_bypass(
      policy,
      ledger,
      scope,
      verdicts,
      &inputs.user,
      inputs.bypass_token.as_deref(),
      inputs.bypass_reason.as_deref(),
      inputs.now,
   );

   match outcome {
      BypassOutcome::NotAttempted => {},
      BypassOutcome::Rejected { why } => {
         audit.record_line(inputs.now, &format!("{} bypass rejected: {why}", scope.as_str()))?;
         if let Some(entry) = entry {
            // A one-time token replay attempt is itself worth a durable
            // record (`result=replayed_denied`). Unlike a successful
            // bypass, a write failure here doesn't change the outcome: the
            // Block already stands, so there is nothing left to deny.
            let _ = Ledger::append_locked(ledger_path, entry);
         }
      },
      BypassOutcome::Cleared { cleared_indices, reason, token_label } => {
         if let Some(entry) = entry {
            let persisted_entry = entry.clone();
            match Ledger::append_locked(ledger_path, persisted_entry) {
               Ok(_) => {
                  for idx in cleared_indices {
                     verdicts[idx].decision = Decision::Allow;
                     bypass_scopes[idx] = Some(scope.as_str());
                  }
                  audit.record_line(
                     inputs.now,
                     &format!(
                        "{} bypass '{token_label}' applied by {} reason={}",
                        scope.as_str(),
                        inputs.user,
                        reason.as_deref().unwrap_or("-"),
                     ),
                  )?;
               },
               Err(e) => {
                  audit.record_line(inputs.now, &format!("{} bypass denied: ledger write failed: {e}", scope.as_str()))?;
               },
            }
         }
      },
   }

   Ok(())
}
