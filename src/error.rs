use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
   #[error("policy file not found at {0}")]
   PolicyNotFound(String),

   #[error("failed to parse policy {path}: {source}")]
   PolicyParse {
      path: String,
      #[source]
      source: serde_json::Error,
   },

   #[error("policy schema invalid: {0}")]
   PolicySchema(String),

   #[error("git command failed: {0}")]
   VcsQueryFailed(String),

   #[error("pattern '{pattern}' is invalid: {reason}")]
   BadPattern { pattern: String, reason: String },

   #[error("bypass ledger could not be written: {0}")]
   LedgerUnwritable(String),

   #[error("failed to acquire ledger lock within the retry budget")]
   LedgerLockTimeout,

   #[error("failed to spawn smoke command {argv:?}: {source}")]
   SmokeSpawnFailed {
      argv: Vec<String>,
      #[source]
      source: std::io::Error,
   },

   #[error("refusing to overwrite an existing hook at {0} (use --force)")]
   ForeignHookPresent(String),

   #[error("{0}")]
   Other(String),

   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   #[error("JSON error: {0}")]
   Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HookError>;
