//! Terminal result presenter.
//!
//! Terminal styling helpers (colors, boxes, icons) in the house style used
//! elsewhere in this codebase; there's no spinner since a sub-second hook
//! has nothing worth animating.
//! Respects `NO_COLOR` and this crate's own env toggles
//! (`DV_HOOK_MUTE`, `DV_HOOK_TIPS`, `DV_HOOK_SHOW_DECISIONS`).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use owo_colors::OwoColorize;

use crate::changes::Change;
use crate::evaluator::{Decision, Rule, Verdict};
use crate::policy::UiOptions;

static COLOR_ENABLED: OnceLock<bool> = OnceLock::new();

/// Whether color output is enabled (cached on first call).
pub fn colors_enabled() -> bool {
   *COLOR_ENABLED.get_or_init(|| {
      if std::env::var("NO_COLOR").is_ok() {
         return false;
      }
      supports_color::on(supports_color::Stream::Stdout).is_some_and(|level| level.has_basic)
   })
}

fn success(s: &str) -> String {
   if colors_enabled() { s.green().bold().to_string() } else { s.to_string() }
}

fn warning(s: &str) -> String {
   if colors_enabled() { s.yellow().to_string() } else { s.to_string() }
}

fn error(s: &str) -> String {
   if colors_enabled() { s.red().bold().to_string() } else { s.to_string() }
}

fn dim(s: &str) -> String {
   if colors_enabled() { s.dimmed().to_string() } else { s.to_string() }
}

fn bold(s: &str) -> String {
   if colors_enabled() { s.bold().to_string() } else { s.to_string() }
}

/// Get terminal width, capped at 120 columns.
fn term_width() -> usize {
   terminal_size::terminal_size().map_or(80, |(w, _)| w.0 as usize).min(120)
}

/// Below this width the decorative box-drawing line either side of a section
/// title is dropped in favor of the bare title (see `DV_HOOK_BOX_MIN`);
/// narrow terminals (CI log viewers, narrow splits) get the same
/// information without wrapped garbage.
fn box_min_width() -> usize {
   std::env::var("DV_HOOK_BOX_MIN").ok().and_then(|v| v.parse().ok()).unwrap_or(40)
}

mod box_chars {
   pub const HORIZONTAL: char = '\u{2500}';
}

mod icons {
   pub const SUCCESS: &str = "\u{2713}";
   pub const ERROR: &str = "\u{2717}";
   pub const BULLET: &str = "\u{2022}";
}

fn section_header(title: &str, width: usize) -> String {
   if width < box_min_width() {
      return bold(title);
   }
   let title_len = title.chars().count();
   let line_len = (width.saturating_sub(title_len + 2)) / 2;
   let line = box_chars::HORIZONTAL.to_string().repeat(line_len);
   if colors_enabled() {
      format!("{} {} {}", dim(&line), bold(title), dim(&line))
   } else {
      format!("{line} {title} {line}")
   }
}

/// One change plus the verdict the evaluator reached for it.
pub struct ReportedVerdict<'a> {
   pub change:       &'a Change,
   pub verdict:       &'a Verdict,
   pub bypass_scope: Option<&'a str>,
}

/// Render the final report and return the process exit code.
#[must_use]
pub fn present(verdicts: &[ReportedVerdict<'_>], smoke_failed: bool, smoke_warned: bool, ui: &UiOptions) -> i32 {
   let mute = std::env::var("DV_HOOK_MUTE").is_ok_and(|v| v != "0");
   let show_tips = !std::env::var("DV_HOOK_TIPS").is_ok_and(|v| v == "0");
   let show_all_decisions = std::env::var("DV_HOOK_SHOW_DECISIONS").is_ok_and(|v| v != "0");

   let blocks: Vec<&ReportedVerdict<'_>> = verdicts.iter().filter(|v| v.verdict.decision == Decision::Block).collect();

   if show_all_decisions && !mute {
      for v in verdicts {
         print_decision_line(v);
      }
   }

   if blocks.is_empty() && !smoke_failed {
      if !mute {
         println!("{} {}", success(icons::SUCCESS), success("pre-commit checks passed"));
         if smoke_warned {
            println!("{} {}", warning("!"), warning("smoke tests reported failures in warn mode; see simlog/smoke.log"));
         }
      }
      return 0;
   }

   if mute {
      eprintln!("{} {} file(s) blocked by repository policy", error(icons::ERROR), blocks.len());
      return 1;
   }

   let width = term_width();
   println!("{}", section_header("access control", width));

   let mut groups: BTreeMap<Rule, Vec<&ReportedVerdict<'_>>> = BTreeMap::new();
   for v in &blocks {
      groups.entry(v.verdict.rule).or_default().push(v);
   }

   for (rule, items) in rule_order().into_iter().filter_map(|r| groups.remove(&r).map(|items| (r, items))) {
      println!("\n{} {} ({})", error(icons::BULLET), bold(rule_label(rule)), items.len());
      for item in items.iter().take(ui.max_files_per_group) {
         println!("  {} {}", dim(icons::BULLET), item.change.display_path());
      }
      if items.len() > ui.max_files_per_group {
         println!("  {}", dim(&format!("... and {} more", items.len() - ui.max_files_per_group)));
      }
      if show_tips
         && let Some(hint) = bypass_hint(rule)
      {
         println!("  {}", dim(hint));
      }
   }

   if smoke_failed {
      println!("\n{} {}", error(icons::BULLET), bold("smoke tests failed; see simlog/smoke.log"));
   }

   println!();
   1
}

fn rule_order() -> [Rule; 6] {
   [Rule::PolicyEdit, Rule::Freeze, Rule::DeletionProtected, Rule::Locked, Rule::Restricted, Rule::Default]
}

fn rule_label(rule: Rule) -> &'static str {
   match rule {
      Rule::PolicyEdit => "policy file is protected",
      Rule::Freeze => "frozen paths",
      Rule::DeletionProtected => "protected deletions",
      Rule::GlobalExt => "global extension bypass",
      Rule::Locked => "locked paths",
      Rule::Restricted => "restricted paths",
      Rule::Default => "blocked",
   }
}

fn bypass_hint(rule: Rule) -> Option<&'static str> {
   match rule {
      Rule::Freeze => Some("set DV_HOOK_BYPASS (and DV_HOOK_BYPASS_REASON if required) with a freeze token to override"),
      Rule::DeletionProtected | Rule::Locked | Rule::Restricted => {
         Some("set DV_HOOK_BYPASS (and DV_HOOK_BYPASS_REASON if required) with an emergency token to override")
      },
      Rule::PolicyEdit | Rule::GlobalExt | Rule::Default => None,
   }
}

fn print_decision_line(v: &ReportedVerdict<'_>) {
   let decision = match v.verdict.decision {
      Decision::Allow => success("ALLOW"),
      Decision::Block => error("BLOCK"),
   };
   println!("{decision} {} [{}]", v.change.display_path(), v.verdict.rule.as_str());
}
