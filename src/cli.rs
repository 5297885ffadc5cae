//! CLI surface.
//!
//! Git invokes the compiled binary with zero arguments to run the gate
//! itself. The same binary doubles as the operator's tool for installing
//! the hook and authoring the policy, via the subcommands below, none of
//! which are reachable from the git-invoked code path.

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dv-hook", about = "Declarative pre-commit access-control gate")]
pub struct Cli {
   #[command(subcommand)]
   pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
   /// Install this binary as the repository's pre-commit hook.
   Install {
      /// Overwrite an existing, non-generated hook.
      #[arg(long)]
      force: bool,
   },
   /// Validate a policy file without evaluating any staged changes.
   LintPolicy {
      /// Path to the policy file (defaults to config/hook_policy.json).
      #[arg(long)]
      path: Option<PathBuf>,
   },
   /// Read a secret from stdin and print its SHA-256 hex, for pasting into
   /// a token's `sha256` field.
   HashToken,
}

pub fn read_secret_from_stdin() -> std::io::Result<String> {
   let mut buf = String::new();
   std::io::stdin().read_to_string(&mut buf)?;
   Ok(buf.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_no_subcommand() {
      let cli = Cli::try_parse_from(["dv-hook"]).unwrap();
      assert!(cli.command.is_none());
   }

   #[test]
   fn parses_install_with_force() {
      let cli = Cli::try_parse_from(["dv-hook", "install", "--force"]).unwrap();
      assert!(matches!(cli.command, Some(Command::Install { force: true })));
   }

   #[test]
   fn parses_lint_policy_with_path() {
      let cli = Cli::try_parse_from(["dv-hook", "lint-policy", "--path", "x.json"]).unwrap();
      match cli.command {
         Some(Command::LintPolicy { path }) => assert_eq!(path, Some(PathBuf::from("x.json"))),
         _ => panic!("expected LintPolicy"),
      }
   }
}
