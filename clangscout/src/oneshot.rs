use std::io::{BufRead, Write};
use tracing::{info, warn};

use crate::dispatch::{DispatchOutcome, Dispatcher, Workload};
use crate::errors::ScoutResult;
use crate::invoker::QueryInvoker;
use crate::metrics::DispatchStats;
use crate::results::{binding_locations, FileIssue, Match};

/// How a one-shot report is laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportFormat {
    /// Prefix each match with `Match #n:`
    pub numbered: bool,
    /// Finish with a `N matches.` line
    pub show_count: bool,
    /// Print `binds here` locations instead of match bodies
    pub locations_only: bool,
}

/// What a one-shot run printed and what went wrong along the way
#[derive(Debug, Default)]
pub struct OneShotSummary {
    /// Number of entries written to the output
    pub reported: usize,
    pub issues: Vec<(String, FileIssue)>,
    pub stats: DispatchStats,
}

/// Reads one newline terminated query, stripping the line ending.
///
/// Returns `None` if the input was already at end of stream.
pub fn read_query<R: BufRead>(input: &mut R) -> ScoutResult<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Reads a query from `input`, runs one round and writes every distinct match to `output`
pub fn run_once<I, R, W>(
    dispatcher: &Dispatcher<I>,
    workload: &Workload,
    input: &mut R,
    output: &mut W,
    format: ReportFormat,
) -> ScoutResult<OneShotSummary>
where
    I: QueryInvoker,
    R: BufRead,
    W: Write,
{
    let query = read_query(input)?.unwrap_or_default();
    if query.is_empty() {
        warn!("Empty query received, running the round anyway");
    }

    let DispatchOutcome {
        matches,
        issues,
        stats,
    } = dispatcher.dispatch_workload(workload, &query)?;

    let matches = matches.into_sorted();
    let reported = write_report(output, &matches, format)?;
    info!("Reported {} entries for query {:?}", reported, query);

    Ok(OneShotSummary {
        reported,
        issues,
        stats,
    })
}

/// Writes `matches` in the requested layout, returning how many entries were written
pub fn write_report<W: Write>(
    output: &mut W,
    matches: &[Match],
    format: ReportFormat,
) -> ScoutResult<usize> {
    let entries: Vec<String> = if format.locations_only {
        binding_locations(matches)
    } else {
        matches.iter().map(|m| m.body().to_string()).collect()
    };

    for (i, entry) in entries.iter().enumerate() {
        if format.numbered {
            writeln!(output, "Match #{}:", i + 1)?;
            writeln!(output, "{}", entry)?;
            writeln!(output)?;
        } else {
            writeln!(output, "{}", entry)?;
        }
    }

    if format.show_count {
        let noun = match (format.locations_only, entries.len()) {
            (true, 1) => "location",
            (true, _) => "locations",
            (false, 1) => "match",
            (false, _) => "matches",
        };
        writeln!(output, "{} {}.", entries.len(), noun)?;
    }

    output.flush()?;
    Ok(entries.len())
}
