/// This module fans a single query out over many files and merges what comes back.
///
/// # Permit Pool
///
/// Every round builds its own rayon pool with exactly `concurrency` threads. A
/// pool thread plays the role of a permit: a job holds it from the moment its
/// tool process is spawned until its matches are merged, and gives it back
/// whether the job succeeded or not. Jobs are split with `with_max_len(1)` so an
/// idle thread steals the next pending file as soon as it frees up:
/// ```rust,ignore
/// pool.install(|| {
///     jobs.par_iter()
///         .with_max_len(1)
///         .for_each(|job| run_job(job));
/// });
/// ```
///
/// Because the pool is owned by the round, limits never leak between rounds and
/// two dispatchers never compete for the same permits.
///
/// # Fault Isolation
///
/// A job never fails the round. Invocation errors and error-stream output are
/// collected per file as [`FileIssue`]s while the remaining jobs carry on.
use dashmap::DashMap;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use tracing::{debug, info, warn};

use crate::errors::{ScoutError, ScoutResult};
use crate::invoker::QueryInvoker;
use crate::metrics::{DispatchMetrics, DispatchStats};
use crate::parser::{parse_matches_with, ParseOptions};
use crate::results::{FileIssue, MatchSet};

/// The unit of work for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub file: String,
    pub query: String,
    pub tool_args: Vec<String>,
}

/// Files and tool arguments fixed when a front-end starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    pub files: Vec<String>,
    pub tool_args: Vec<String>,
}

impl Workload {
    pub fn new(files: Vec<String>, tool_args: Vec<String>) -> Self {
        Self { files, tool_args }
    }
}

/// Everything a finished round produced
#[derive(Debug)]
pub struct DispatchOutcome {
    pub matches: MatchSet,
    /// Per-file problems, sorted by file
    pub issues: Vec<(String, FileIssue)>,
    pub stats: DispatchStats,
}

/// Number of workers used when none is configured
pub fn default_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

/// Decodes a file argument written as a quoted string literal.
///
/// Double-quoted arguments use JSON escapes, which is what `jq` prints for
/// entries of a compilation database. Backquoted arguments are taken verbatim.
/// Anything else, including a malformed literal, is returned unchanged.
pub fn unquote_file(file: &str) -> String {
    if file.len() >= 2 && file.starts_with('"') && file.ends_with('"') {
        if let Ok(decoded) = serde_json::from_str::<String>(file) {
            return decoded;
        }
    } else if file.len() >= 2 && file.starts_with('`') && file.ends_with('`') {
        return file[1..file.len() - 1].to_string();
    }
    file.to_string()
}

/// Runs one query against many files with a bounded number of tool processes
#[derive(Debug, Clone)]
pub struct Dispatcher<I> {
    invoker: I,
    concurrency: NonZeroUsize,
    parse_options: ParseOptions,
}

impl<I: QueryInvoker> Dispatcher<I> {
    pub fn new(invoker: I) -> Self {
        Self {
            invoker,
            concurrency: default_concurrency(),
            parse_options: ParseOptions::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_parse_options(mut self, parse_options: ParseOptions) -> Self {
        self.parse_options = parse_options;
        self
    }

    pub fn concurrency(&self) -> NonZeroUsize {
        self.concurrency
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Runs `query` once per distinct file and returns the merged matches.
    ///
    /// Returns only after every job has finished. The only error is a worker
    /// pool that could not be built.
    pub fn dispatch(
        &self,
        files: &[String],
        query: &str,
        tool_args: &[String],
    ) -> ScoutResult<DispatchOutcome> {
        info!("Dispatching query {:?} over {} files", query, files.len());

        let jobs = build_jobs(files, query, tool_args);
        let matches = MatchSet::new();
        let issues = DashMap::new();
        let metrics = DispatchMetrics::new();

        if !jobs.is_empty() {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.concurrency.get())
                .thread_name(|i| format!("clangscout-worker-{}", i))
                .build()
                .map_err(|e| ScoutError::thread_pool(e.to_string()))?;

            pool.install(|| {
                jobs.par_iter()
                    .with_max_len(1)
                    .for_each(|job| self.run_job(job, &matches, &issues, &metrics));
            });
        }

        metrics.log_stats();

        let mut issues: Vec<(String, FileIssue)> = issues.into_iter().collect();
        issues.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            "Dispatch complete. Found {} distinct matches in {} files",
            matches.len(),
            jobs.len()
        );

        Ok(DispatchOutcome {
            matches,
            issues,
            stats: metrics.get_stats(),
        })
    }

    /// Runs `query` over a front-end's fixed workload
    pub fn dispatch_workload(&self, workload: &Workload, query: &str) -> ScoutResult<DispatchOutcome> {
        self.dispatch(&workload.files, query, &workload.tool_args)
    }

    fn run_job(
        &self,
        job: &DispatchJob,
        matches: &MatchSet,
        issues: &DashMap<String, FileIssue>,
        metrics: &DispatchMetrics,
    ) {
        metrics.record_start();
        let result = self.invoker.invoke(job);
        metrics.record_finish();

        match result {
            Ok(invocation) => {
                if invocation.has_tool_errors() {
                    metrics.record_tool_error();
                    warn!("{} reported: {}", job.file, invocation.stderr.trim_end());
                    issues.insert(job.file.clone(), FileIssue::ToolReported(invocation.stderr));
                }

                let parsed = parse_matches_with(&invocation.stdout, &self.parse_options);
                metrics.record_matches(parsed.len());
                let added = matches.extend(parsed);
                debug!("{}: {} new matches", job.file, added);
            }
            Err(e) => {
                metrics.record_failure();
                warn!("Query failed for {}: {}", job.file, e);
                issues.insert(job.file.clone(), FileIssue::InvocationFailed(e.to_string()));
            }
        }
    }
}

fn build_jobs(files: &[String], query: &str, tool_args: &[String]) -> Vec<DispatchJob> {
    let mut seen = HashSet::new();
    files
        .iter()
        .filter(|file| seen.insert(file.as_str()))
        .map(|file| DispatchJob {
            file: file.clone(),
            query: query.to_string(),
            tool_args: tool_args.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::Invocation;
    use crate::results::Match;
    use std::io;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Invoker whose behaviour is scripted by a closure
    struct ScriptedInvoker<F>(F);

    impl<F> QueryInvoker for ScriptedInvoker<F>
    where
        F: Fn(&DispatchJob) -> ScoutResult<Invocation> + Send + Sync,
    {
        fn invoke(&self, job: &DispatchJob) -> ScoutResult<Invocation> {
            (self.0)(job)
        }
    }

    fn report(file: &str, count: usize) -> String {
        let mut out = String::from("\n");
        for i in 0..count {
            out.push_str(&format!(
                "Match #{}:\n\n{}:{}:1: note: \"root\" binds here\nint v{};\n^~~~~~~\n\n",
                i + 1,
                file,
                i + 1,
                i
            ));
        }
        out.push_str(&format!("{} matches.\n", count));
        out
    }

    fn ok(stdout: String) -> ScoutResult<Invocation> {
        Ok(Invocation {
            stdout,
            ..Default::default()
        })
    }

    fn reporting(
        count: usize,
    ) -> ScriptedInvoker<impl Fn(&DispatchJob) -> ScoutResult<Invocation> + Send + Sync> {
        ScriptedInvoker(move |job: &DispatchJob| ok(report(&job.file, count)))
    }

    fn files(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("src/file_{}.cpp", i)).collect()
    }

    fn limit(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_empty_file_list() {
        let dispatcher = Dispatcher::new(reporting(1));
        let outcome = dispatcher.dispatch(&[], "root", &[]).unwrap();
        assert!(outcome.matches.is_empty());
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.stats.invocations, 0);
    }

    #[test]
    fn test_completeness_for_every_limit() {
        const K: usize = 6;
        const M: usize = 3;
        let files = files(K);

        for n in 1..=K {
            let dispatcher = Dispatcher::new(reporting(M)).with_concurrency(limit(n));
            let outcome = dispatcher.dispatch(&files, "root", &[]).unwrap();

            assert_eq!(outcome.matches.len(), K * M, "limit {}", n);
            assert_eq!(outcome.stats.invocations, K as u64);
            assert_eq!(outcome.stats.matches_parsed, (K * M) as u64);
            assert_eq!(outcome.stats.in_flight, 0);
        }
    }

    #[test]
    fn test_concurrency_limit_is_respected() {
        for n in [1, 2, 4] {
            let dispatcher = Dispatcher::new(ScriptedInvoker(|job: &DispatchJob| {
                thread::sleep(Duration::from_millis(15));
                ok(report(&job.file, 1))
            }))
            .with_concurrency(limit(n));

            let outcome = dispatcher.dispatch(&files(12), "root", &[]).unwrap();
            assert!(outcome.stats.peak_in_flight >= 1);
            assert!(
                outcome.stats.peak_in_flight <= n as u64,
                "peak {} exceeded limit {}",
                outcome.stats.peak_in_flight,
                n
            );
            assert_eq!(outcome.matches.len(), 12);
        }
    }

    #[test]
    fn test_concurrency_limit_is_reached() {
        // Every wave only clears the barrier once `n` jobs are running side by side
        for n in [1, 2, 4, 8] {
            let barrier = Barrier::new(n);
            let dispatcher = Dispatcher::new(ScriptedInvoker(|job: &DispatchJob| {
                barrier.wait();
                ok(report(&job.file, 1))
            }))
            .with_concurrency(limit(n));

            let outcome = dispatcher.dispatch(&files(3 * n), "root", &[]).unwrap();
            assert_eq!(outcome.stats.peak_in_flight, n as u64);
            assert_eq!(outcome.matches.len(), 3 * n);
        }
    }

    #[test]
    fn test_overlapping_results_are_deduplicated() {
        let dispatcher =
            Dispatcher::new(ScriptedInvoker(|_: &DispatchJob| ok(report("common.h", 4))))
                .with_concurrency(limit(4));
        let outcome = dispatcher.dispatch(&files(10), "root", &[]).unwrap();

        assert_eq!(outcome.matches.len(), 4);
        assert_eq!(outcome.stats.matches_parsed, 40);
    }

    #[test]
    fn test_failed_invocation_is_isolated() {
        let failing = "src/file_3.cpp";
        let dispatcher = Dispatcher::new(ScriptedInvoker(move |job: &DispatchJob| {
            if job.file == failing {
                Err(ScoutError::spawn(
                    "clang-query",
                    io::Error::new(io::ErrorKind::NotFound, "not found"),
                ))
            } else {
                ok(report(&job.file, 2))
            }
        }))
        .with_concurrency(limit(3));

        let outcome = dispatcher.dispatch(&files(5), "root", &[]).unwrap();

        assert_eq!(outcome.matches.len(), 4 * 2);
        assert_eq!(outcome.stats.failed_invocations, 1);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].0, failing);
        assert!(matches!(outcome.issues[0].1, FileIssue::InvocationFailed(_)));
    }

    #[test]
    fn test_tool_errors_are_collected_without_losing_matches() {
        let dispatcher = Dispatcher::new(ScriptedInvoker(|job: &DispatchJob| {
            Ok(Invocation {
                stdout: report(&job.file, 1),
                stderr: if job.file.ends_with("_0.cpp") {
                    "error: no such file or directory\n".to_string()
                } else {
                    String::new()
                },
                status: None,
            })
        }));

        let outcome = dispatcher.dispatch(&files(3), "root", &[]).unwrap();

        assert_eq!(outcome.matches.len(), 3);
        assert_eq!(outcome.stats.tool_errors, 1);
        assert_eq!(
            outcome.issues,
            vec![(
                "src/file_0.cpp".to_string(),
                FileIssue::ToolReported("error: no such file or directory\n".to_string())
            )]
        );
    }

    #[test]
    fn test_jobs_carry_query_and_args() {
        let dispatcher = Dispatcher::new(ScriptedInvoker(|job: &DispatchJob| {
            assert_eq!(job.query, "match cxxRecordDecl()");
            assert_eq!(job.tool_args, vec!["-p".to_string(), "build".to_string()]);
            ok(report(&job.file, 1))
        }));

        let outcome = dispatcher
            .dispatch(
                &files(2),
                "match cxxRecordDecl()",
                &["-p".to_string(), "build".to_string()],
            )
            .unwrap();
        assert_eq!(outcome.matches.len(), 2);
    }

    #[test]
    fn test_duplicate_files_are_dispatched_once() {
        let files = vec!["a.cpp".to_string(), "b.cpp".to_string(), "a.cpp".to_string()];
        let dispatcher = Dispatcher::new(reporting(1));
        let outcome = dispatcher.dispatch(&files, "root", &[]).unwrap();

        assert_eq!(outcome.stats.invocations, 2);
        assert_eq!(outcome.matches.len(), 2);
        assert!(outcome.matches.contains(&Match::new(
            "a.cpp:1:1: note: \"root\" binds here\nint v0;\n^~~~~~~"
        )));
    }

    #[test]
    fn test_unquote_file() {
        assert_eq!(unquote_file("\"src/a.cpp\""), "src/a.cpp");
        assert_eq!(unquote_file("\"dir with space/b.cpp\""), "dir with space/b.cpp");
        assert_eq!(unquote_file("\"C:\\\\src\\\\c.cpp\""), "C:\\src\\c.cpp");
        assert_eq!(unquote_file("`raw\\path.cpp`"), "raw\\path.cpp");
        assert_eq!(unquote_file("plain.cpp"), "plain.cpp");
        assert_eq!(unquote_file("\""), "\"");
        assert_eq!(unquote_file("\"broken\\q\""), "\"broken\\q\"");
    }

    #[test]
    fn test_build_jobs_preserves_order() {
        let files = vec!["b.cpp".to_string(), "a.cpp".to_string(), "b.cpp".to_string()];
        let jobs = build_jobs(&files, "q", &[]);
        let names: Vec<&str> = jobs.iter().map(|j| j.file.as_str()).collect();
        assert_eq!(names, vec!["b.cpp", "a.cpp"]);
    }
}
