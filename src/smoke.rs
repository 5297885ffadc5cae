//! Optional post-decision smoke gate.
//!
//! Runs external validation commands when risky paths change. Commands run
//! sequentially and stop at the first failure; whether a failure blocks the
//! commit depends on `smoke_test.mode`.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{HookError, Result};
use crate::patterns::{self};
use crate::policy::{Shell, SmokeMode, SmokeTest};

pub const SMOKE_LOG_RELATIVE_PATH: &str = "simlog/smoke.log";

#[derive(Debug)]
pub struct CommandOutcome {
   pub argv:     Vec<String>,
   pub success:  bool,
   pub timed_out: bool,
   pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct SmokeRun {
   pub ran:      bool,
   pub outcomes: Vec<CommandOutcome>,
}

impl SmokeRun {
   #[must_use]
   pub fn all_passed(&self) -> bool {
      self.outcomes.iter().all(|o| o.success)
   }
}

/// Decide which command groups are triggered by the new-side paths of
/// `changed_paths`, and run them in declared order, stopping at the first
/// failure within each group.
pub fn run_if_triggered(smoke: &SmokeTest, repo_root: &Path, changed_paths: &[std::path::PathBuf], log_path: &Path) -> Result<SmokeRun> {
   if !smoke.enabled {
      return Ok(SmokeRun::default());
   }

   let (compile_patterns, _) = patterns::compile_all(&smoke.paths_compile_elab, true, true);
   let (sw_patterns, _) = patterns::compile_all(&smoke.sw_header_globs, true, true);

   let triggers_compile = changed_paths.iter().any(|p| compile_patterns.iter().any(|g| g.matches(repo_root, p)));
   let triggers_sw = changed_paths.iter().any(|p| sw_patterns.iter().any(|g| g.matches(repo_root, p)));

   let mut run = SmokeRun { ran: triggers_compile || triggers_sw, outcomes: Vec::new() };
   if !run.ran {
      return Ok(run);
   }

   if let Some(parent) = log_path.parent() {
      std::fs::create_dir_all(parent)?;
   }

   if triggers_compile {
      run_group(smoke, repo_root, &smoke.cmds_compile_elab, log_path, &mut run)?;
   }
   if triggers_sw && run.all_passed() {
      run_group(smoke, repo_root, &smoke.cmds_sw, log_path, &mut run)?;
   }

   Ok(run)
}

fn run_group(smoke: &SmokeTest, repo_root: &Path, commands: &[Vec<String>], log_path: &Path, run: &mut SmokeRun) -> Result<()> {
   for argv in commands {
      let outcome = run_one(smoke, repo_root, argv, log_path)?;
      let failed = !outcome.success;
      run.outcomes.push(outcome);
      if failed {
         break;
      }
   }
   Ok(())
}

fn build_command(smoke: &SmokeTest, repo_root: &Path, argv: &[String]) -> Command {
   match smoke.shell {
      Shell::Csh => {
         let mut cmd = Command::new("csh");
         let quoted = shell_quote_all(argv);
         let script = match &smoke.setup_script {
            Some(setup) if repo_root.join(setup).exists() => format!("source {setup} && {quoted}"),
            _ => quoted,
         };
         cmd.args(["-c", &script]);
         cmd.current_dir(repo_root);
         cmd
      },
      Shell::Sh => {
         let mut cmd = Command::new("sh");
         cmd.args(["-c", &shell_quote_all(argv)]);
         cmd.current_dir(repo_root);
         cmd
      },
      Shell::None => {
         let mut cmd = Command::new(argv.first().map_or("true", String::as_str));
         cmd.args(argv.iter().skip(1));
         cmd.current_dir(repo_root);
         cmd
      },
   }
}

fn shell_quote_all(argv: &[String]) -> String {
   argv.iter().map(|a| format!("'{}'", a.replace('\'', "'\\''"))).collect::<Vec<_>>().join(" ")
}

fn run_one(smoke: &SmokeTest, repo_root: &Path, argv: &[String], log_path: &Path) -> Result<CommandOutcome> {
   let mut cmd = build_command(smoke, repo_root, argv);
   cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

   let started = Instant::now();
   let mut child = cmd
      .spawn()
      .map_err(|e| HookError::SmokeSpawnFailed { argv: argv.to_vec(), source: e })?;

   let timeout = Duration::from_secs(smoke.timeout());
   let (success, timed_out) = wait_with_timeout(&mut child, timeout)?;
   let duration = started.elapsed();

   append_log(log_path, argv, success, timed_out, duration)?;

   Ok(CommandOutcome { argv: argv.to_vec(), success, timed_out, duration })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<(bool, bool)> {
   let deadline = Instant::now() + timeout;
   loop {
      if let Some(status) = child.try_wait()? {
         return Ok((status.success(), false));
      }
      if Instant::now() >= deadline {
         let _ = child.kill();
         let _ = child.wait();
         return Ok((false, true));
      }
      std::thread::sleep(Duration::from_millis(50));
   }
}

fn append_log(log_path: &Path, argv: &[String], success: bool, timed_out: bool, duration: Duration) -> Result<()> {
   use std::io::Write as _;
   let mut file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
   let status = if timed_out { "TIMEOUT" } else if success { "OK" } else { "FAIL" };
   writeln!(file, "[{status}] {:?} ({})", argv, format_duration(duration))?;
   Ok(())
}

/// Render a duration the way a human reads timing lines: microseconds,
/// milliseconds, or seconds depending on magnitude.
#[must_use]
pub fn format_duration(d: Duration) -> String {
   let micros = d.as_micros();
   if micros < 1_000 {
      format!("{micros}us")
   } else if micros < 1_000_000 {
      format!("{:.1}ms", micros as f64 / 1_000.0)
   } else {
      format!("{:.2}s", d.as_secs_f64())
   }
}

/// Whether a failed/timed-out `SmokeRun` should block the commit.
#[must_use]
pub fn should_block(smoke: &SmokeTest, run: &SmokeRun) -> bool {
   run.ran && !run.all_passed() && smoke.mode() == SmokeMode::Block
}
