use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, trace};

use crate::dispatch::DispatchJob;
use crate::errors::{ScoutError, ScoutResult};

/// Tool run when nothing else is configured
pub const DEFAULT_TOOL: &str = "clang-query";

/// Everything captured from one run of the query tool
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, if the process could be waited on
    pub status: Option<ExitStatus>,
}

impl Invocation {
    /// Whether the tool wrote anything to its error stream
    pub fn has_tool_errors(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Trait for running the query tool against a single file
pub trait QueryInvoker: Send + Sync {
    fn invoke(&self, job: &DispatchJob) -> ScoutResult<Invocation>;
}

/// Runs an external clang-query compatible binary as a child process
#[derive(Debug, Clone)]
pub struct ClangQueryInvoker {
    tool: PathBuf,
}

impl ClangQueryInvoker {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }
}

impl Default for ClangQueryInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL)
    }
}

impl QueryInvoker for ClangQueryInvoker {
    /// Spawns `<tool> <file> <tool_args...>`, feeds the query on stdin and
    /// collects both output streams once the process exits.
    fn invoke(&self, job: &DispatchJob) -> ScoutResult<Invocation> {
        trace!("Running {} on {}", self.tool.display(), job.file);

        let mut child = Command::new(&self.tool)
            .arg(&job.file)
            .args(&job.tool_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScoutError::spawn(&self.tool, e))?;

        // Dropping stdin at the end of this block tells the tool the query is complete
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = writeln!(stdin, "{}", job.query) {
                debug!("Failed to send query to {}: {}", job.file, e);
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            debug!("{} exited with {} for {}", self.tool.display(), output.status, job.file);
        }

        Ok(Invocation {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: Some(output.status),
        })
    }
}
