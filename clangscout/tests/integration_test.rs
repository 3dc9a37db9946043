#![cfg(unix)]

use anyhow::Result;
use clangscout::{ClangQueryInvoker, Dispatcher, FileIssue, Match, Workload};
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use tempfile::tempdir;

/// Writes canned clang-query reports; running `cat` on them replays the output
fn create_reports(dir: &Path, file_count: usize, matches_per_file: usize) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for i in 0..file_count {
        let path = dir.join(format!("report_{}.txt", i));
        let mut report = String::from("\n");
        for j in 0..matches_per_file {
            report.push_str(&format!(
                "Match #{}:\n\nsrc/unit_{}.cpp:{}:1: note: \"root\" binds here\nusing namespace std;\n^~~~~~~~~~~~~~~~~~~\n\n",
                j + 1,
                i,
                j + 1
            ));
        }
        report.push_str(&format!("{} matches.\n", matches_per_file));
        fs::write(&path, report)?;
        files.push(path.to_string_lossy().into_owned());
    }
    Ok(files)
}

fn cat_dispatcher(limit: usize) -> Dispatcher<ClangQueryInvoker> {
    Dispatcher::new(ClangQueryInvoker::new("cat")).with_concurrency(NonZeroUsize::new(limit).unwrap())
}

#[test]
fn test_end_to_end_two_matches() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("output.txt");
    fs::write(
        &path,
        "Match #1:\n\nfile.cpp:1:1: note: X\ncode;\n^~~\n\nMatch #2:\n\nfile.cpp:2:2: note: Y\nother;\n^~\n\n",
    )?;

    let outcome = cat_dispatcher(2).dispatch(&[path.to_string_lossy().into_owned()], "root", &[])?;

    assert_eq!(
        outcome.matches.into_sorted(),
        vec![
            Match::new("file.cpp:1:1: note: X\ncode;\n^~~"),
            Match::new("file.cpp:2:2: note: Y\nother;\n^~"),
        ]
    );
    Ok(())
}

#[test]
fn test_completeness_with_real_processes() -> Result<()> {
    const K: usize = 5;
    const M: usize = 4;
    let dir = tempdir()?;
    let files = create_reports(dir.path(), K, M)?;

    for limit in 1..=K {
        let outcome = cat_dispatcher(limit).dispatch(&files, "root", &[])?;
        assert_eq!(outcome.matches.len(), K * M, "limit {}", limit);
        assert!(outcome.issues.is_empty());
        assert!(outcome.stats.peak_in_flight <= limit as u64);
    }
    Ok(())
}

#[test]
fn test_missing_file_is_isolated() -> Result<()> {
    let dir = tempdir()?;
    let mut files = create_reports(dir.path(), 3, 2)?;
    let missing = dir.path().join("missing.cpp").to_string_lossy().into_owned();
    files.insert(1, missing.clone());

    let outcome = cat_dispatcher(2).dispatch(&files, "root", &[])?;

    assert_eq!(outcome.matches.len(), 3 * 2);
    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(outcome.issues[0].0, missing);
    assert!(matches!(outcome.issues[0].1, FileIssue::ToolReported(_)));
    Ok(())
}

#[test]
fn test_unstartable_tool_yields_empty_round() -> Result<()> {
    let dir = tempdir()?;
    let files = create_reports(dir.path(), 3, 2)?;

    let dispatcher = Dispatcher::new(ClangQueryInvoker::new("clangscout-no-such-tool"));
    let outcome = dispatcher.dispatch(&files, "root", &[])?;

    assert!(outcome.matches.is_empty());
    assert_eq!(outcome.stats.failed_invocations, 3);
    assert!(outcome
        .issues
        .iter()
        .all(|(_, issue)| matches!(issue, FileIssue::InvocationFailed(_))));
    Ok(())
}

#[test]
fn test_query_and_args_reach_the_tool() -> Result<()> {
    let dir = tempdir()?;
    let script = dir.path().join("fake-clang-query.sh");
    fs::write(
        &script,
        "read query\nprintf 'Match #1:\\n\\n%s:1:1: note: \"%s\" binds here\\nx;\\n^\\n\\n1 match.\\n' \"$1\" \"$query\"\n",
    )?;

    let dispatcher = Dispatcher::new(ClangQueryInvoker::new("sh"));
    let workload = Workload::new(
        vec![script.to_string_lossy().into_owned()],
        vec!["forwarded.cpp".to_string()],
    );
    let outcome = dispatcher.dispatch_workload(&workload, "decl")?;

    assert_eq!(
        outcome.matches.into_sorted(),
        vec![Match::new("forwarded.cpp:1:1: note: \"decl\" binds here\nx;\n^")]
    );
    Ok(())
}

#[test]
fn test_empty_file_list() -> Result<()> {
    let outcome = cat_dispatcher(4).dispatch(&[], "root", &[])?;
    assert_eq!(outcome.matches.len(), 0);
    assert_eq!(outcome.stats.invocations, 0);
    Ok(())
}
