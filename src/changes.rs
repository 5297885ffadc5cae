//! Staged change collection and user identity.
//!
//! Shells out to `git` the same way the upstream commit-message tooling
//! this crate grew out of did: build argv, run with a fixed `current_dir`,
//! check exit status, decode stdout as UTF-8 lossily.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{HookError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
   Added,
   Modified,
   Deleted,
   Renamed,
   Copied,
   TypeChanged,
}

/// One staged change as reported by the VCS, with rename detection already
/// applied.
#[derive(Debug, Clone)]
pub struct Change {
   pub status:   Status,
   pub old_path: Option<PathBuf>,
   pub new_path: Option<PathBuf>,
}

impl Change {
   /// The paths this change exposes to pattern matching. A rename exposes
   /// both sides; every other status exposes just the one side it has.
   #[must_use]
   pub fn effective_paths(&self) -> EffectivePaths {
      EffectivePaths { old: self.old_path.clone(), new: self.new_path.clone() }
   }

   /// A single label for audit/report lines.
   #[must_use]
   pub fn display_path(&self) -> String {
      match (&self.old_path, &self.new_path) {
         (Some(old), Some(new)) if old != new => format!("{} -> {}", old.display(), new.display()),
         (Some(old), None) => old.display().to_string(),
         (_, Some(new)) => new.display().to_string(),
         (None, None) => String::new(),
      }
   }
}

#[derive(Debug, Clone, Default)]
pub struct EffectivePaths {
   pub old: Option<PathBuf>,
   pub new: Option<PathBuf>,
}

fn run_git(repo_root: &Path, args: &[&str]) -> Result<String> {
   let output = Command::new("git")
      .args(args)
      .current_dir(repo_root)
      .output()
      .map_err(|e| HookError::VcsQueryFailed(format!("failed to run git {args:?}: {e}")))?;
   if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(HookError::VcsQueryFailed(format!("git {args:?} failed: {stderr}")));
   }
   Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Find the repository root for the current working directory.
pub fn repo_root() -> Result<PathBuf> {
   let output = run_git(Path::new("."), &["rev-parse", "--show-toplevel"])?;
   Ok(PathBuf::from(output.trim()))
}

/// The git-configured user name, used as the identity for policy decisions.
pub fn current_user(repo_root: &Path) -> Result<String> {
   let output = run_git(repo_root, &["config", "user.name"])?;
   let name = output.trim();
   if name.is_empty() {
      std::env::var("USER")
         .or_else(|_| std::env::var("USERNAME"))
         .map_err(|_| HookError::VcsQueryFailed("no git user.name and no USER/USERNAME env var".to_string()))
   } else {
      Ok(name.to_string())
   }
}

/// Collect the staged change set with rename detection (`git diff --cached
/// --name-status -M`).
pub fn collect_staged_changes(repo_root: &Path) -> Result<Vec<Change>> {
   let output = run_git(repo_root, &["diff", "--cached", "--name-status", "-M", "-z"])?;
   parse_name_status(&output)
}

fn parse_name_status(raw: &str) -> Result<Vec<Change>> {
   let fields: Vec<&str> = raw.split('\0').filter(|s| !s.is_empty()).collect();
   let mut changes = Vec::new();
   let mut i = 0;
   while i < fields.len() {
      let code = fields[i];
      i += 1;
      let status_char = code.chars().next().unwrap_or('?');
      match status_char {
         'A' => {
            let path = fields.get(i).copied().unwrap_or_default();
            i += 1;
            changes.push(Change { status: Status::Added, old_path: None, new_path: Some(PathBuf::from(path)) });
         },
         'M' => {
            let path = fields.get(i).copied().unwrap_or_default();
            i += 1;
            changes.push(Change { status: Status::Modified, old_path: None, new_path: Some(PathBuf::from(path)) });
         },
         'D' => {
            let path = fields.get(i).copied().unwrap_or_default();
            i += 1;
            changes.push(Change { status: Status::Deleted, old_path: Some(PathBuf::from(path)), new_path: None });
         },
         'T' => {
            let path = fields.get(i).copied().unwrap_or_default();
            i += 1;
            changes.push(Change {
               status:   Status::TypeChanged,
               old_path: Some(PathBuf::from(path)),
               new_path: Some(PathBuf::from(path)),
            });
         },
         'R' => {
            let old = fields.get(i).copied().unwrap_or_default();
            let new = fields.get(i + 1).copied().unwrap_or_default();
            i += 2;
            changes.push(Change {
               status:   Status::Renamed,
               old_path: Some(PathBuf::from(old)),
               new_path: Some(PathBuf::from(new)),
            });
         },
         'C' => {
            let old = fields.get(i).copied().unwrap_or_default();
            let new = fields.get(i + 1).copied().unwrap_or_default();
            i += 2;
            changes.push(Change {
               status:   Status::Copied,
               old_path: Some(PathBuf::from(old)),
               new_path: Some(PathBuf::from(new)),
            });
         },
         _ => {
            // Unknown status code (e.g. 'U' unmerged); skip the associated
            // path field so we don't desync the stream.
            i += 1;
         },
      }
   }
   Ok(changes)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_simple_statuses() {
      let raw = "A\0new.rs\0M\0existing.rs\0D\0gone.rs\0";
      let changes = parse_name_status(raw).unwrap();
      assert_eq!(changes.len(), 3);
      assert_eq!(changes[0].status, Status::Added);
      assert_eq!(changes[1].status, Status::Modified);
      assert_eq!(changes[2].status, Status::Deleted);
   }

   #[test]
   fn parses_rename_as_two_sided() {
      let raw = "R100\0old/path.rs\0new/path.rs\0";
      let changes = parse_name_status(raw).unwrap();
      assert_eq!(changes.len(), 1);
      assert_eq!(changes[0].status, Status::Renamed);
      assert_eq!(changes[0].old_path, Some(PathBuf::from("old/path.rs")));
      assert_eq!(changes[0].new_path, Some(PathBuf::from("new/path.rs")));
   }

   #[test]
   fn display_path_shows_arrow_for_rename() {
      let change = Change {
         status:   Status::Renamed,
         old_path: Some(PathBuf::from("a")),
         new_path: Some(PathBuf::from("b")),
      };
      assert_eq!(change.display_path(), "a -> b");
   }
}
