/// This module recovers structured matches from clang-query's human readable output.
///
/// # Output Shape
///
/// clang-query has no machine readable output mode for diagnostics, so the report
/// is framed by sentinel lines instead of a schema:
/// ```text
///
/// Match #1:
///
/// /src/a.cpp:12:1: note: "root" binds here
/// using namespace std;
/// ^~~~~~~~~~~~~~~~~~~
///
/// Match #2:
/// ...
/// 2 matches.
/// ```
///
/// # Scanner
///
/// Parsing is a two state scan over lines. Lines before the first marker are
/// preamble and are dropped. Every marker closes the block being accumulated (even
/// an empty one) and opens the next. When a block is closed its leading and
/// trailing blank lines are trimmed, and the final block additionally loses the
/// `N matches.` summary footer.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::results::Match;

/// Token that starts every match block
pub const MARKER: &str = "Match";

/// Anything shorter than this cannot contain a well formed match
pub const MIN_OUTPUT_LINES: usize = 6;

static SUMMARY_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+ match(es)?\.$").unwrap());

/// Knobs for block reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Keep blank lines that appear inside a match body
    pub keep_blank_lines: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            keep_blank_lines: true,
        }
    }
}

enum ScanState<'a> {
    SeekingMarker,
    InBlock(Vec<&'a str>),
}

/// Parses raw tool output using the default options
pub fn parse_matches(raw: &str) -> Vec<Match> {
    parse_matches_with(raw, &ParseOptions::default())
}

/// Parses raw tool output into the matches it reports
pub fn parse_matches_with(raw: &str, options: &ParseOptions) -> Vec<Match> {
    let lines: Vec<&str> = raw
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();

    if lines.len() < MIN_OUTPUT_LINES {
        return Vec::new();
    }

    let mut matches = Vec::new();
    let mut state = ScanState::SeekingMarker;

    for line in lines {
        if is_marker(line) {
            let previous = std::mem::replace(&mut state, ScanState::InBlock(Vec::new()));
            if let ScanState::InBlock(block) = previous {
                matches.push(close_block(&block, false, options));
            }
        } else if let ScanState::InBlock(block) = &mut state {
            block.push(line);
        }
    }

    if let ScanState::InBlock(block) = state {
        matches.push(close_block(&block, true, options));
    }

    matches
}

fn is_marker(line: &str) -> bool {
    match line.strip_prefix(MARKER) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '#' || c == ':'),
        None => false,
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn close_block(lines: &[&str], is_last: bool, options: &ParseOptions) -> Match {
    let lines = if is_last { strip_footer(lines) } else { lines };
    let body = trim_blank_edges(lines)
        .iter()
        .copied()
        .filter(|line| options.keep_blank_lines || !is_blank(line))
        .collect::<Vec<_>>()
        .join("\n");
    Match::new(body)
}

fn strip_footer<'a, 'b>(lines: &'b [&'a str]) -> &'b [&'a str] {
    let mut end = lines.len();
    while end > 0 && (is_blank(lines[end - 1]) || SUMMARY_LINE.is_match(lines[end - 1].trim())) {
        end -= 1;
    }
    &lines[..end]
}

fn trim_blank_edges<'a, 'b>(lines: &'b [&'a str]) -> &'b [&'a str] {
    let start = lines
        .iter()
        .position(|line| !is_blank(line))
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|line| !is_blank(line))
        .map_or(start, |i| i + 1);
    &lines[start..end]
}
