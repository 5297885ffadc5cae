use chrono::Local;
use clap::Parser;
use dv_hook::cli::{self, Cli, Command};
use dv_hook::error::{HookError, Result};
use dv_hook::{changes, gate, policy::Policy};

const HOOK_MARKER: &str = "# installed by dv-hook";

fn main() -> std::process::ExitCode {
   let cli = Cli::parse();
   match run(cli) {
      Ok(code) => std::process::ExitCode::from(code as u8),
      Err(e) => {
         eprintln!("dv-hook: {e}");
         std::process::ExitCode::from(2)
      },
   }
}

fn run(cli: Cli) -> Result<i32> {
   match cli.command {
      None => run_gate(),
      Some(Command::Install { force }) => run_install(force).map(|()| 0),
      Some(Command::LintPolicy { path }) => run_lint_policy(path).map(|()| 0),
      Some(Command::HashToken) => run_hash_token().map(|()| 0),
   }
}

fn run_gate() -> Result<i32> {
   let repo_root = changes::repo_root()?;
   let git_dir = repo_root.join(".git");
   let user = changes::current_user(&repo_root)?;
   let policy_path = Policy::path_for(&repo_root);
   let (policy, warnings) = Policy::load(&policy_path)?;
   for warning in &warnings {
      eprintln!("dv-hook: warning: {warning}");
   }

   let staged = changes::collect_staged_changes(&repo_root)?;
   if staged.is_empty() {
      return Ok(0);
   }

   let inputs = gate::GateInputs {
      repo_root,
      git_dir,
      user,
      now: Local::now().naive_local(),
      bypass_token: std::env::var("DV_HOOK_BYPASS").ok(),
      bypass_reason: std::env::var("DV_HOOK_BYPASS_REASON").ok(),
   };

   gate::run(&policy, &staged, &inputs)
}

fn run_install(force: bool) -> Result<()> {
   let repo_root = changes::repo_root()?;
   let hooks_dir = repo_root.join(".git/hooks");
   std::fs::create_dir_all(&hooks_dir)?;
   let hook_path = hooks_dir.join("pre-commit");

   if hook_path.exists() {
      let existing = std::fs::read_to_string(&hook_path).unwrap_or_default();
      if !existing.contains(HOOK_MARKER) && !force {
         return Err(HookError::ForeignHookPresent(hook_path.display().to_string()));
      }
   }

   let exe = std::env::current_exe()?;
   let script = format!("#!/bin/sh\n{HOOK_MARKER}\nexec \"{}\" \"$@\"\n", exe.display());
   std::fs::write(&hook_path, script)?;

   #[cfg(unix)]
   {
      use std::os::unix::fs::PermissionsExt;
      let mut perms = std::fs::metadata(&hook_path)?.permissions();
      perms.set_mode(0o755);
      std::fs::set_permissions(&hook_path, perms)?;
   }

   println!("installed pre-commit hook at {}", hook_path.display());
   Ok(())
}

fn run_lint_policy(path: Option<std::path::PathBuf>) -> Result<()> {
   let path = match path {
      Some(p) => p,
      None => {
         let repo_root = changes::repo_root().unwrap_or_else(|_| std::path::PathBuf::from("."));
         Policy::path_for(&repo_root)
      },
   };
   let (policy, warnings) = Policy::load(&path)?;
   println!("policy at {} parsed successfully", path.display());
   println!("  locked rules:     {}", policy.locked.len());
   println!("  restricted rules: {}", policy.restricted.len());
   println!("  deletion rules:   {}", policy.deletion_protected.len());
   if warnings.is_empty() {
      println!("no warnings");
   } else {
      for w in &warnings {
         println!("warning: {w}");
      }
   }
   Ok(())
}

fn run_hash_token() -> Result<()> {
   use sha2::{Digest, Sha256};
   let secret = cli::read_secret_from_stdin()?;
   let mut hasher = Sha256::new();
   hasher.update(secret.as_bytes());
   let digest = hasher.finalize();
   let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
   println!("{hex}");
   Ok(())
}
