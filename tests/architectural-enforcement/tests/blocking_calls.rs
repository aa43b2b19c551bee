//! Integration Test: Blocking Call Prohibition
//!
//! Model calls, permit waits and store writes all run on the tokio runtime.
//! A blocking call in any of them stalls every other in-flight model call
//! sharing the worker thread, so production code must use the async
//! equivalents.

use architectural_enforcement::{assert_clean, scan_dir, Rule};

const PRODUCTION_DIRS: [&str; 2] = ["consensus/core/src", "consensus/cli/src"];

#[test]
fn test_no_thread_sleep() {
    let rules = [Rule {
        name: "Blocking sleep",
        pattern: "std::thread::sleep",
    }];
    let violations: Vec<_> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| scan_dir(dir, &rules, &[]))
        .collect();
    assert_clean("std::thread::sleep (use tokio::time)", &violations);
}

#[test]
fn test_timer_sleeps_only_in_scripted_client() {
    let rules = [Rule {
        name: "Timer sleep",
        pattern: "time::sleep(",
    }];
    let violations: Vec<_> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| scan_dir(dir, &rules, &["backend/scripted.rs"]))
        .collect();
    assert_clean("sleep outside the scripted client (wait on I/O instead)", &violations);
}

#[test]
fn test_no_blocking_http_client() {
    let rules = [Rule {
        name: "Blocking HTTP client",
        pattern: "reqwest::blocking",
    }];
    let violations: Vec<_> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| scan_dir(dir, &rules, &[]))
        .collect();
    assert_clean("reqwest::blocking (use the async client)", &violations);
}

#[test]
fn test_no_blocking_fs_in_async_modules() {
    let rules = [
        Rule {
            name: "Blocking file I/O",
            pattern: "std::fs",
        },
        Rule {
            name: "Blocking file handle",
            pattern: "File::open(",
        },
    ];
    let mut violations = scan_dir("consensus/core/src/store", &rules, &[]);
    for module in ["pipeline.rs", "fanout.rs", "consolidator.rs"] {
        violations.extend(architectural_enforcement::scan_file(
            &architectural_enforcement::workspace_root()
                .join("consensus/core/src")
                .join(module),
            &rules,
        ));
    }
    assert_clean("blocking std::fs in async modules (use tokio::fs)", &violations);
}
