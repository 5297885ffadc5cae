//! Scenario 6 from `SPEC_FULL.md` §8: the smoke gate actually spawns real
//! child processes, so unlike `tests/end_to_end.rs` this exercises the
//! commit pipeline including genuine subprocess execution.

use std::path::Path;
use std::process::Command;

use chrono::NaiveDateTime;
use dv_hook::gate::{self, GateInputs};
use dv_hook::policy::{Policy, SmokeMode, SmokeTest};

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

fn now() -> NaiveDateTime {
   NaiveDateTime::parse_from_str("2026-07-28 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

fn smoke_test(mode: SmokeMode, exit_code: &str) -> SmokeTest {
   SmokeTest {
      enabled: true,
      mode: Some(mode),
      timeout_sec: Some(5),
      shell: dv_hook::policy::Shell::None,
      setup_script: None,
      paths_compile_elab: vec!["tb/**".into()],
      cmds_compile_elab: vec![vec!["sh".into(), "-c".into(), format!("exit {exit_code}")]],
      sw_header_globs: vec![],
      cmds_sw: vec![],
   }
}

#[test]
fn smoke_failure_blocks_commit_in_block_mode() {
   let repo = init_repo();
   std::fs::create_dir_all(repo.path().join("tb")).unwrap();
   std::fs::write(repo.path().join("tb/sample.sv"), "module sample; endmodule\n").unwrap();
   git(repo.path(), &["add", "-A"]);

   let mut policy = Policy::default();
   policy.smoke_test = smoke_test(SmokeMode::Block, "1");

   let cs = dv_hook::changes::collect_staged_changes(repo.path()).unwrap();
   let inputs = GateInputs {
      repo_root: repo.path().to_path_buf(),
      git_dir: repo.path().join(".git"),
      user: "Alice".to_string(),
      now: now(),
      bypass_token: None,
      bypass_reason: None,
   };

   let code = gate::run(&policy, &cs, &inputs).unwrap();
   assert_eq!(code, 1);
}

#[test]
fn smoke_failure_warns_without_blocking_in_warn_mode() {
   let repo = init_repo();
   std::fs::create_dir_all(repo.path().join("tb")).unwrap();
   std::fs::write(repo.path().join("tb/sample.sv"), "module sample; endmodule\n").unwrap();
   git(repo.path(), &["add", "-A"]);

   let mut policy = Policy::default();
   policy.smoke_test = smoke_test(SmokeMode::Warn, "1");

   let cs = dv_hook::changes::collect_staged_changes(repo.path()).unwrap();
   let inputs = GateInputs {
      repo_root: repo.path().to_path_buf(),
      git_dir: repo.path().join(".git"),
      user: "Alice".to_string(),
      now: now(),
      bypass_token: None,
      bypass_reason: None,
   };

   let code = gate::run(&policy, &cs, &inputs).unwrap();
   assert_eq!(code, 0);
}

#[test]
fn smoke_success_never_blocks() {
   let repo = init_repo();
   std::fs::create_dir_all(repo.path().join("tb")).unwrap();
   std::fs::write(repo.path().join("tb/sample.sv"), "module sample; endmodule\n").unwrap();
   git(repo.path(), &["add", "-A"]);

   let mut policy = Policy::default();
   policy.smoke_test = smoke_test(SmokeMode::Block, "0");

   let cs = dv_hook::changes::collect_staged_changes(repo.path()).unwrap();
   let inputs = GateInputs {
      repo_root: repo.path().to_path_buf(),
      git_dir: repo.path().join(".git"),
      user: "Alice".to_string(),
      now: now(),
      bypass_token: None,
      bypass_reason: None,
   };

   let code = gate::run(&policy, &cs, &inputs).unwrap();
   assert_eq!(code, 0);
}
