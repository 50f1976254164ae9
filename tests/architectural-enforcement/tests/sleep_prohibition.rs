//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Gateway production code MUST NOT call sleep methods, and the
//! streaming engine and change bus MUST NOT use timers at all: a session
//! re-evaluates only when its topic changes or it is cancelled.
//! **Exceptions**: test code (`#[cfg(test)]` modules, `tests/` directories)

use std::fs;
use std::path::Path;

use architectural_enforcement::{code_part, production_lines, workspace_root};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in ["gateway/core/src", "gateway/daemon/src"] {
        check_directory(&root.join(dir), &mut violations, &["::sleep(", ".sleep("]);
    }

    report(&violations, "sleep");
}

/// Test that stream re-evaluation is driven by the change bus only
#[test]
fn test_no_timers_in_streaming() {
    let root = workspace_root();
    let mut violations = Vec::new();
    let forbidden = ["::sleep(", "interval(", "sleep_until(", "timeout("];
    check_directory(&root.join("gateway/core/src/streaming"), &mut violations, &forbidden);
    check_file(&root.join("gateway/core/src/bus.rs"), &mut violations, &forbidden);

    report(&violations, "timer");
}

fn report(violations: &[String], kind: &str) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ CRITICAL: {kind} calls found in production code!\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!("\n✅ Wait on change notifications or cancellation tokens instead.");

    panic!(
        "\nFound {} {kind} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

fn check_directory(dir: &Path, violations: &mut Vec<String>, forbidden: &[&str]) {
    assert!(dir.exists(), "missing source directory {}", dir.display());

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), violations, forbidden);
        }
    }
}

fn check_file(path: &Path, violations: &mut Vec<String>, forbidden: &[&str]) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (line_number, line) in production_lines(&content) {
        let code = code_part(line);
        if forbidden.iter().any(|pattern| code.contains(pattern)) {
            violations.push(format!(
                "{}:{} - {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }
    }
}

#[test]
fn test_detector_skips_test_modules_and_comments() {
    let source = "\
fn run() {
    // tokio::time::sleep(d) would be wrong here
    wait().await;
}

#[cfg(test)]
mod tests {
    fn helper() { std::thread::sleep(d); }
}
";
    let lines = production_lines(source);
    assert_eq!(lines.len(), 5);
    assert!(lines
        .iter()
        .all(|(_, line)| !code_part(line).contains("sleep(")));
}
