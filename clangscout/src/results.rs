/// This module implements the result types produced by a dispatch round.
///
/// # Identity
///
/// A [`Match`] is nothing more than the display text clang-query printed for one
/// finding: the location/note line, the quoted source line and the caret line.
/// Two matches are the same finding exactly when that text is equal, so `Match`
/// derives `Eq` and `Hash` over its body and can key a set directly:
/// ```rust,ignore
/// let set = MatchSet::new();
/// set.add(Match::new("a.cpp:1:1: note: \"root\" binds here\nint x;\n^~~~~"));
/// set.add(Match::new("a.cpp:1:1: note: \"root\" binds here\nint x;\n^~~~~"));
/// assert_eq!(set.len(), 1);
/// ```
///
/// # Sharing Across Workers
///
/// [`MatchSet`] is the only object mutated by more than one worker during a
/// round. Writers take the exclusive side of an `RwLock`, readers the shared
/// side, and the set is handed back by value once every worker has joined.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};

static BINDING_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(.+): note: "[^"]*" binds here$"#).unwrap());

/// One finding reported by the query tool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Match {
    body: String,
}

impl Match {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// The full display text of the match
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Locations of every `note: "<id>" binds here` line in the body
    pub fn binding_locations(&self) -> impl Iterator<Item = &str> {
        self.body.lines().filter_map(|line| {
            BINDING_NOTE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
        })
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }
}

impl From<String> for Match {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

impl From<&str> for Match {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

/// Deduplicated collection of matches, safe to fill from many workers at once
#[derive(Debug, Default)]
pub struct MatchSet {
    inner: RwLock<HashSet<Match>>,
}

impl MatchSet {
    /// Creates a new empty set
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts a match, returning `true` if it was not already present
    pub fn add(&self, m: Match) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(m)
    }

    /// Inserts every match from `matches` under a single write lock
    pub fn extend<I>(&self, matches: I) -> usize
    where
        I: IntoIterator<Item = Match>,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        matches
            .into_iter()
            .filter_map(|m| guard.insert(m).then_some(()))
            .count()
    }

    pub fn contains(&self, m: &Match) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(m)
    }

    /// Returns a copy of all held matches in unspecified order
    pub fn snapshot(&self) -> Vec<Match> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the set, returning its matches sorted by body
    pub fn into_sorted(self) -> Vec<Match> {
        let mut matches: Vec<Match> = self
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .collect();
        matches.sort();
        matches
    }
}

/// A problem observed while running the tool against one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIssue {
    /// The tool could not be started or its streams failed
    InvocationFailed(String),
    /// The tool wrote to its error stream
    ToolReported(String),
}

impl fmt::Display for FileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileIssue::InvocationFailed(msg) => write!(f, "invocation failed: {}", msg),
            FileIssue::ToolReported(stderr) => write!(f, "tool reported: {}", stderr.trim_end()),
        }
    }
}

/// Wire shape of a server response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub matches: Vec<String>,
}

impl QueryResponse {
    pub fn from_matches(matches: &[Match]) -> Self {
        Self {
            matches: matches.iter().map(|m| m.body().to_string()).collect(),
        }
    }

    pub fn from_locations(matches: &[Match]) -> Self {
        Self {
            matches: binding_locations(matches),
        }
    }
}

/// Distinct binding locations across `matches`, sorted
pub fn binding_locations(matches: &[Match]) -> Vec<String> {
    matches
        .iter()
        .flat_map(Match::binding_locations)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
