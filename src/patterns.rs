//! Glob pattern matching against staged paths.
//!
//! Patterns may use `**` for multi-segment wildcards and `*`/`?` within a
//! segment. `$NAME`/`${NAME}` are expanded against the process environment
//! before matching; undefined variables are left literal rather than
//! collapsed to empty, since a pattern referencing an unset variable should
//! fail to match rather than silently match everything.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};

use crate::error::{HookError, Result};

/// Expand `$NAME`/`${NAME}` references in `pattern` using the process
/// environment. Undefined variables are left as-is.
#[must_use]
pub fn expand_env(pattern: &str) -> String {
   let mut out = String::with_capacity(pattern.len());
   let chars: Vec<char> = pattern.chars().collect();
   let mut i = 0;
   while i < chars.len() {
      if chars[i] == '$' && i + 1 < chars.len() {
         if chars[i + 1] == '{' {
            if let Some(end) = chars[i + 2..].iter().position(|&c| c == '}') {
               let name: String = chars[i + 2..i + 2 + end].iter().collect();
               match std::env::var(&name) {
                  Ok(value) => out.push_str(&value),
                  Err(_) => {
                     out.push_str("${");
                     out.push_str(&name);
                     out.push('}');
                  },
               }
               i += 2 + end + 1;
               continue;
            }
         } else if chars[i + 1].is_ascii_alphabetic() || chars[i + 1] == '_' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
               end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            match std::env::var(&name) {
               Ok(value) => out.push_str(&value),
               Err(_) => {
                  out.push('$');
                  out.push_str(&name);
               },
            }
            i = end;
            continue;
         }
      }
      out.push(chars[i]);
      i += 1;
   }
   out
}

/// A policy path pattern compiled for repeated matching.
pub struct CompiledPattern {
   raw:      String,
   matcher:  GlobMatcher,
   absolute: bool,
}

impl CompiledPattern {
   /// Compile `pattern`, expanding environment variables if `expand_env` is
   /// set. `absolute_prefix` controls whether a leading `/` makes the pattern
   /// match against an absolute filesystem path.
   pub fn compile(pattern: &str, expand: bool, absolute_prefix: bool) -> Result<Self> {
      let expanded = if expand { expand_env(pattern) } else { pattern.to_string() };
      let absolute = absolute_prefix && expanded.starts_with('/');
      let glob_source = if absolute {
         expanded.clone()
      } else {
         expanded.trim_start_matches('/').to_string()
      };
      let glob = Glob::new(&glob_source).map_err(|e| HookError::BadPattern {
         pattern: pattern.to_string(),
         reason:  e.to_string(),
      })?;
      Ok(Self { raw: pattern.to_string(), matcher: glob.compile_matcher(), absolute })
   }

   #[must_use]
   pub fn raw(&self) -> &str {
      &self.raw
   }

   /// Match `path` (repo-relative) against this pattern, resolving to an
   /// absolute path first when the pattern demands it.
   #[must_use]
   pub fn matches(&self, repo_root: &Path, path: &Path) -> bool {
      if self.absolute {
         let candidate = repo_root.join(path);
         let candidate = normalize(&candidate);
         self.matcher.is_match(&candidate)
      } else {
         let candidate = path.strip_prefix("/").unwrap_or(path);
         self.matcher.is_match(candidate)
      }
   }
}

fn normalize(path: &Path) -> PathBuf {
   let mut out = PathBuf::new();
   for component in path.components() {
      match component {
         std::path::Component::CurDir => {},
         std::path::Component::ParentDir => {
            out.pop();
         },
         other => out.push(other.as_os_str()),
      }
   }
   out
}

/// Compile every pattern in `patterns`, skipping (with the caller deciding
/// what to do about) any that fail to compile.
pub fn compile_all(patterns: &[String], expand: bool, absolute_prefix: bool) -> (Vec<CompiledPattern>, Vec<String>) {
   let mut compiled = Vec::with_capacity(patterns.len());
   let mut errors = Vec::new();
   for pattern in patterns {
      match CompiledPattern::compile(pattern, expand, absolute_prefix) {
         Ok(p) => compiled.push(p),
         Err(e) => errors.push(e.to_string()),
      }
   }
   (compiled, errors)
}

/// Return the lowercase extension of `path` (with leading dot), or `None`
/// for extensionless files.
#[must_use]
pub fn extension_of(path: &Path) -> Option<String> {
   path.extension().map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
}
