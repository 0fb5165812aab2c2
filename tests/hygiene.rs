//! Hygiene — source budgets for panics and swallowed errors.
//!
//! Scans production sources under `src/` (skipping `*_test.rs`) and counts
//! lines containing each pattern. A budget never grows: adding a hit means
//! removing another one first.
//!
//! Current allowances: the relay binary's two startup `.expect`s, and the
//! two `.ok()`s in `config::env_parse` that turn a missing or unparseable
//! variable into its default.

use std::fs;
use std::path::{Path, PathBuf};

struct Budget {
    pattern: &'static str,
    max: usize,
}

// Panics.
const UNWRAP: Budget = Budget { pattern: ".unwrap()", max: 0 };
const EXPECT: Budget = Budget { pattern: ".expect(", max: 2 };
const PANIC: Budget = Budget { pattern: "panic!(", max: 0 };
const UNREACHABLE: Budget = Budget { pattern: "unreachable!(", max: 0 };
const TODO: Budget = Budget { pattern: "todo!(", max: 0 };
const UNIMPLEMENTED: Budget = Budget { pattern: "unimplemented!(", max: 0 };

// Silent loss.
const SILENT_DISCARD: Budget = Budget { pattern: "let _ =", max: 0 };
const DOT_OK: Budget = Budget { pattern: ".ok()", max: 2 };

// Structure.
const ALLOW_DEAD_CODE: Budget = Budget { pattern: "#[allow(dead_code)]", max: 0 };

fn production_sources(dir: &Path, out: &mut Vec<(PathBuf, String)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        if path.is_dir() {
            production_sources(&path, out);
            continue;
        }
        let is_rs = path.extension().is_some_and(|e| e == "rs");
        let is_test = path.to_string_lossy().ends_with("_test.rs");
        if is_rs && !is_test {
            if let Ok(content) = fs::read_to_string(&path) {
                out.push((path, content));
            }
        }
    }
}

fn check(budget: &Budget) {
    let mut sources = Vec::new();
    production_sources(Path::new("src"), &mut sources);
    assert!(!sources.is_empty(), "no sources found; run from the crate root");

    let hits: Vec<(String, usize)> = sources
        .iter()
        .map(|(path, content)| {
            let n = content.lines().filter(|l| l.contains(budget.pattern)).count();
            (path.display().to_string(), n)
        })
        .filter(|(_, n)| *n > 0)
        .collect();
    let found: usize = hits.iter().map(|(_, n)| n).sum();

    let listing: Vec<String> = hits.iter().map(|(p, n)| format!("  {p}: {n}")).collect();
    assert!(
        found <= budget.max,
        "`{}` budget exceeded: found {found}, max {}.\n{}",
        budget.pattern,
        budget.max,
        listing.join("\n")
    );
}

#[test]
fn unwrap_budget() {
    check(&UNWRAP);
}

#[test]
fn expect_budget() {
    check(&EXPECT);
}

#[test]
fn panic_budget() {
    check(&PANIC);
}

#[test]
fn unreachable_budget() {
    check(&UNREACHABLE);
}

#[test]
fn todo_budget() {
    check(&TODO);
}

#[test]
fn unimplemented_budget() {
    check(&UNIMPLEMENTED);
}

#[test]
fn silent_discard_budget() {
    check(&SILENT_DISCARD);
}

#[test]
fn dot_ok_budget() {
    check(&DOT_OK);
}

#[test]
fn allow_dead_code_budget() {
    check(&ALLOW_DEAD_CODE);
}
