//! Append-only human-readable audit log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::changes::Change;
use crate::error::Result;
use crate::evaluator::{Decision, Verdict};

pub struct AuditLog<'a> {
   path: &'a Path,
}

impl<'a> AuditLog<'a> {
   #[must_use]
   pub fn new(path: &'a Path) -> Self {
      Self { path }
   }

   pub fn record_verdict(&self, now: NaiveDateTime, user: &str, change: &Change, verdict: &Verdict, bypass_scope: Option<&str>) -> Result<()> {
      let decision = match verdict.decision {
         Decision::Allow => "ALLOW",
         Decision::Block => "BLOCK",
      };
      let bypass = bypass_scope.map_or(String::new(), |s| format!(" bypass={s}"));
      let line = format!(
         "{} user={} op={} path={} decision={} rule={}{} detail=\"{}\"\n",
         now.format("%Y-%m-%d %H:%M:%S"),
         user,
         status_label(change.status),
         change.display_path(),
         decision,
         verdict.rule.as_str(),
         bypass,
         verdict.detail,
      );
      self.append(&line)
   }

   pub fn record_line(&self, now: NaiveDateTime, message: &str) -> Result<()> {
      self.append(&format!("{} {message}\n", now.format("%Y-%m-%d %H:%M:%S")))
   }

   fn append(&self, line: &str) -> Result<()> {
      if let Some(parent) = self.path.parent() {
         std::fs::create_dir_all(parent)?;
      }
      let mut file = OpenOptions::new().create(true).append(true).open(self.path)?;
      file.write_all(line.as_bytes())?;
      Ok(())
   }
}

fn status_label(status: crate::changes::Status) -> &'static str {
   use crate::changes::Status;
   match status {
      Status::Added => "A",
      Status::Modified => "M",
      Status::Deleted => "D",
      Status::Renamed => "R",
      Status::Copied => "C",
      Status::TypeChanged => "T",
   }
}
