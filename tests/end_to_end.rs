//! End-to-end coverage of the concrete scenarios in `SPEC_FULL.md` §8.
//!
//! Each test builds a real scratch git repository (via `tempfile`), stages
//! real changes through the real `git` binary, then drives the library's
//! `gate::run` pipeline directly — the binary itself is a thin wrapper, so
//! there is nothing additional to gain from spawning it as a subprocess
//! here. Smoke-gate tests are the exception since they need a real child
//! process tree.

use std::path::Path;
use std::process::Command;

use chrono::NaiveDateTime;
use dv_hook::evaluator::Decision;
use dv_hook::gate::{self, GateInputs};
use dv_hook::policy::{
   EmergencyBypass, Freeze, FreezeWindow, GlobalBypass, LockedEntry, Policy, RestrictedEntry, Token,
};
use dv_hook::{changes, evaluator};
use sha2::{Digest, Sha256};

fn hash(secret: &str) -> String {
   let mut hasher = Sha256::new();
   hasher.update(secret.as_bytes());
   hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn git(repo: &Path, args: &[&str]) {
   let status = Command::new("git").args(args).current_dir(repo).status().expect("git invocation failed");
   assert!(status.success(), "git {args:?} failed");
}

fn init_repo() -> tempfile::TempDir {
   let dir = tempfile::tempdir().unwrap();
   git(dir.path(), &["init", "-q"]);
   git(dir.path(), &["config", "user.email", "test@example.com"]);
   git(dir.path(), &["config", "user.name", "Alice"]);
   dir
}

fn write(repo: &Path, rel: &str, content: &str) {
   let path = repo.join(rel);
   if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
   }
   std::fs::write(path, content).unwrap();
}

fn stage_all(repo: &Path) {
   git(repo, &["add", "-A"]);
}

fn now() -> NaiveDateTime {
   NaiveDateTime::parse_from_str("2026-07-28 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

fn inputs(repo: &Path, user: &str) -> GateInputs {
   GateInputs {
      repo_root:     repo.to_path_buf(),
      git_dir:       repo.join(".git"),
      user:          user.to_string(),
      now:           now(),
      bypass_token:  None,
      bypass_reason: None,
   }
}

fn staged(repo: &Path) -> Vec<dv_hook::changes::Change> {
   changes::collect_staged_changes(repo).unwrap()
}

#[test]
fn scenario_1_locked_blocks_unless_global_extension() {
   let repo = init_repo();
   write(repo.path(), "design/apb.v", "module apb;\nendmodule\n");
   write(repo.path(), "design/README.md", "hello\n");
   stage_all(repo.path());

   let mut policy = Policy::default();
   policy.locked.push(LockedEntry { paths: vec!["design/**".into()], allowed_extensions: Default::default() });
   policy.global_bypass = GlobalBypass { allowed_extensions: [".md".to_string()].into_iter().collect() };

   let cs = staged(repo.path());
   let in_ = inputs(repo.path(), "Alice");
   let code = gate::run(&policy, &cs, &in_).unwrap();
   assert_eq!(code, 1);
}

#[test]
fn scenario_2_restricted_allows_listed_user() {
   let repo = init_repo();
   write(repo.path(), "sw/setup.cfg", "x=1\n");
   stage_all(repo.path());

   let mut policy = Policy::default();
   policy.restricted.push(RestrictedEntry {
      paths:              vec!["sw/**".into()],
      allowed_users:      ["Vishal".to_string()].into_iter().collect(),
      allowed_extensions: Default::default(),
   });

   let cs = staged(repo.path());

   let alice_code = gate::run(&policy, &cs, &inputs(repo.path(), "Alice")).unwrap();
   assert_eq!(alice_code, 1);

   let vishal_code = gate::run(&policy, &cs, &inputs(repo.path(), "Vishal")).unwrap();
   assert_eq!(vishal_code, 0);
}

#[test]
fn scenario_3_one_time_emergency_bypass_cannot_be_replayed() {
   let repo = init_repo();
   write(repo.path(), "design/keep.sv", "module keep; endmodule\n");
   stage_all(repo.path());
   git(repo.path(), &["commit", "-q", "-m", "seed"]);
   git(repo.path(), &["rm", "-q", "design/keep.sv"]);

   let mut policy = Policy::default();
   policy.deletion_protected.push("design/**".into());
   policy.emergency_bypass = EmergencyBypass {
      enabled:        true,
      allowed_users:  ["Alice".to_string()].into_iter().collect(),
      require_reason: true,
      tokens:         vec![Token { label: "t1".into(), sha256: hash("T1"), reusable: false, expires: None }],
   };

   let cs = staged(repo.path());

   let mut first = inputs(repo.path(), "Alice");
   first.bypass_token = Some("T1".to_string());
   first.bypass_reason = Some("urgent".to_string());
   let code = gate::run(&policy, &cs, &first).unwrap();
   assert_eq!(code, 0, "first use of a one-time token should clear the block");

   let mut second = inputs(repo.path(), "Alice");
   second.bypass_token = Some("T1".to_string());
   second.bypass_reason = Some("urgent".to_string());
   let code = gate::run(&policy, &cs, &second).unwrap();
   assert_eq!(code, 1, "replaying a one-time token must be rejected");
}

#[test]
fn scenario_4_freeze_blocks_unaffected_paths_still_allowed() {
   let repo = init_repo();
   write(repo.path(), "tb/sample.sv", "module sample; endmodule\n");
   write(repo.path(), "doc/readme.md", "hello\n");
   stage_all(repo.path());

   let mut policy = Policy::default();
   policy.global_bypass = GlobalBypass { allowed_extensions: [".md".to_string()].into_iter().collect() };
   policy.freeze = Freeze {
      enabled:        true,
      branch:         None,
      windows:        vec![FreezeWindow { from: None, to: None, paths: vec!["tb/**".into()] }],
      allowed_users:  ["Vishal".to_string()].into_iter().collect(),
      require_reason: true,
      tokens:         vec![Token { label: "f1".into(), sha256: hash("F1"), reusable: false, expires: None }],
      priority:       dv_hook::policy::FreezePriority::OverrideAll,
   };

   let cs = staged(repo.path());
   let code = gate::run(&policy, &cs, &inputs(repo.path(), "Alice")).unwrap();
   assert_eq!(code, 1);

   let mut with_token = inputs(repo.path(), "Vishal");
   with_token.bypass_token = Some("F1".to_string());
   with_token.bypass_reason = Some("release".to_string());
   let code = gate::run(&policy, &cs, &with_token).unwrap();
   assert_eq!(code, 0);
}

#[test]
fn scenario_5_policy_edit_blocks_non_admin_and_ignores_bypass() {
   let repo = init_repo();
   write(repo.path(), "config/hook_policy.json", "{}");
   stage_all(repo.path());

   let mut policy = Policy::default();
   policy.emergency_bypass = EmergencyBypass {
      enabled:        true,
      allowed_users:  ["Alice".to_string()].into_iter().collect(),
      require_reason: false,
      tokens:         vec![Token { label: "t2".into(), sha256: hash("T2"), reusable: true, expires: None }],
   };

   let cs = staged(repo.path());
   let mut in_ = inputs(repo.path(), "Alice");
   in_.bypass_token = Some("T2".to_string());
   let code = gate::run(&policy, &cs, &in_).unwrap();
   assert_eq!(code, 1, "PolicyEdit blocks must never be cleared by any bypass");
}

#[test]
fn rename_is_decided_by_the_stricter_side() {
   let repo = init_repo();
   write(repo.path(), "design/keep.sv", "module keep; endmodule\n");
   stage_all(repo.path());
   git(repo.path(), &["commit", "-q", "-m", "seed"]);

   std::fs::create_dir_all(repo.path().join("src")).unwrap();
   std::fs::rename(repo.path().join("design/keep.sv"), repo.path().join("src/keep.sv")).unwrap();
   stage_all(repo.path());

   let mut policy = Policy::default();
   policy.deletion_protected.push("design/**".into());

   let cs = staged(repo.path());
   let code = gate::run(&policy, &cs, &inputs(repo.path(), "Alice")).unwrap();
   assert_eq!(code, 1, "renaming out of a deletion-protected path is still a protected delete");
}

#[test]
fn verdicts_are_one_per_change_and_pure_in_current_time() {
   let repo = init_repo();
   write(repo.path(), "a.txt", "x\n");
   stage_all(repo.path());
   let policy = Policy::default();
   let cs = staged(repo.path());
   assert_eq!(cs.len(), 1);

   let compiled = evaluator::CompiledPolicy::compile(&policy);
   let v1 = evaluator::evaluate(&compiled, repo.path(), &cs[0], "Alice", now());
   let v2 = evaluator::evaluate(&compiled, repo.path(), &cs[0], "Alice", now());
   assert_eq!(v1.decision, v2.decision);
   assert_eq!(v1.decision, Decision::Allow);
}
