//! Durable, append-only ledger of bypass events.
//!
//! Writes are atomic (write to a sibling temp file, then rename) and
//! guarded by an advisory lock on the ledger file itself so that two
//! concurrent hook invocations cannot both observe a one-time token as
//! unused. A missing or unparseable ledger is treated as empty, with the
//! caller responsible for deciding whether that's acceptable (it is not,
//! for one-time token validation; see `bypass::try_bypass` callers).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use fs4::FileExt;
use serde::{Deserialize, Serialize};

use crate::bypass::Scope;
use crate::error::{HookError, Result};

pub const LEDGER_RELATIVE_PATH: &str = "dv-hooks/bypass_ledger.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
   pub ts:          NaiveDateTime,
   pub user:        String,
   pub scope:       String,
   pub label:       String,
   pub hash_prefix: String,
   pub reusable:    bool,
   pub reason:      Option<String>,
   pub files:       Vec<String>,
   pub result:      String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
   entries: Vec<LedgerEntry>,
}

impl Ledger {
   #[must_use]
   pub fn path_for(git_dir: &Path) -> PathBuf {
      git_dir.join(LEDGER_RELATIVE_PATH)
   }

   /// Load the ledger, or an empty one if it doesn't exist or can't be
   /// parsed (the failure is logged by the caller, not here).
   pub fn load(path: &Path) -> Self {
      let Ok(raw) = std::fs::read_to_string(path) else {
         return Self::default();
      };
      serde_json::from_str(&raw).unwrap_or_default()
   }

   #[must_use]
   pub fn has_consumed(&self, scope: Scope, hash: &str) -> bool {
      let prefix = &hash[..12.min(hash.len())];
      self
         .entries
         .iter()
         .any(|e| e.scope == scope.as_str() && e.hash_prefix == prefix && e.result == "consumed")
   }

   pub fn push(&mut self, entry: LedgerEntry) {
      self.entries.push(entry);
   }

   #[must_use]
   pub fn entries(&self) -> &[LedgerEntry] {
      &self.entries
   }

   /// Re-read the ledger under an advisory lock, append `entry`, and write
   /// it back atomically. Returns the freshly-reloaded ledger so the
   /// caller's in-memory replay check is against the latest state, not a
   /// possibly-stale snapshot taken before the lock was acquired.
   pub fn append_locked(path: &Path, entry: LedgerEntry) -> Result<Self> {
      if let Some(parent) = path.parent() {
         std::fs::create_dir_all(parent)?;
      }

      let lock_file = OpenOptions::new().create(true).write(true).truncate(false).open(path).map_err(|e| {
         HookError::LedgerUnwritable(format!("could not open ledger lock file: {e}"))
      })?;
      lock_exclusive_with_retry(&lock_file)?;

      let mut current = Self::load(path);
      current.push(entry);

      let result = write_atomic(path, &current);
      FileExt::unlock(&lock_file).ok();
      result?;
      Ok(current)
   }
}

fn lock_exclusive_with_retry(file: &File) -> Result<()> {
   const ATTEMPTS: u32 = 50;
   const DELAY: std::time::Duration = std::time::Duration::from_millis(20);
   for attempt in 0..ATTEMPTS {
      if FileExt::try_lock_exclusive(file).is_ok() {
         return Ok(());
      }
      if attempt + 1 == ATTEMPTS {
         break;
      }
      std::thread::sleep(DELAY);
   }
   Err(HookError::LedgerLockTimeout)
}

fn write_atomic(path: &Path, ledger: &Ledger) -> Result<()> {
   let parent = path.parent().unwrap_or_else(|| Path::new("."));
   let mut tmp = tempfile::NamedTempFile::new_in(parent)
      .map_err(|e| HookError::LedgerUnwritable(format!("could not create temp file: {e}")))?;
   let json = serde_json::to_string_pretty(ledger)?;
   tmp.write_all(json.as_bytes()).map_err(|e| HookError::LedgerUnwritable(format!("write failed: {e}")))?;
   tmp.flush().map_err(|e| HookError::LedgerUnwritable(format!("flush failed: {e}")))?;
   tmp.persist(path).map_err(|e| HookError::LedgerUnwritable(format!("rename failed: {e}")))?;
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   fn entry(label: &str, hash_prefix: &str, scope: &str) -> LedgerEntry {
      LedgerEntry {
         ts: NaiveDateTime::parse_from_str("2026-07-28 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
         user: "alice".to_string(),
         scope: scope.to_string(),
         label: label.to_string(),
         hash_prefix: hash_prefix.to_string(),
         reusable: false,
         reason: Some("urgent".to_string()),
         files: vec!["design/keep.sv".to_string()],
         result: "consumed".to_string(),
      }
   }

   #[test]
   fn has_consumed_matches_scope_and_prefix() {
      let mut ledger = Ledger::default();
      ledger.push(entry("t1", "abcdef012345", "emergency"));
      assert!(ledger.has_consumed(Scope::Emergency, "abcdef012345rest_of_hash"));
      assert!(!ledger.has_consumed(Scope::Freeze, "abcdef012345rest_of_hash"));
   }

   #[test]
   fn append_locked_persists_and_reloads() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join(LEDGER_RELATIVE_PATH);
      let reloaded = Ledger::append_locked(&path, entry("t1", "aaaaaaaaaaaa", "emergency")).unwrap();
      assert_eq!(reloaded.entries().len(), 1);

      let reloaded_from_disk = Ledger::load(&path);
      assert_eq!(reloaded_from_disk.entries().len(), 1);
      assert_eq!(reloaded_from_disk.entries()[0].label, "t1");
   }

   #[test]
   fn missing_ledger_loads_as_empty() {
      let ledger = Ledger::load(Path::new("/nonexistent/ledger.json"));
      assert!(ledger.entries().is_empty());
   }
}
