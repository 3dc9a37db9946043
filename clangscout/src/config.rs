use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::dispatch::default_concurrency;
use crate::errors::ScoutResult;
use crate::invoker::DEFAULT_TOOL;
use crate::parser::ParseOptions;

/// Address the server listens on when none is configured
pub const DEFAULT_LISTEN: &str = ":3333";

/// Settings shared by the one-shot and server front-ends.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.clangscout.yaml` in the current directory
/// 3. Global `$HOME/.config/clangscout/config.yaml`
///
/// # Configuration Format
///
/// ```yaml
/// # Query tool to run once per file
/// tool: "clang-query"
///
/// # Arguments passed to the tool after the file name
/// tool_args:
///   - "-p"
///   - "build"
///
/// # Maximum concurrent tool processes (default: CPU cores)
/// concurrency: 8
///
/// # Server listen address
/// listen: ":3333"
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
///
/// # Keep blank lines inside match bodies
/// keep_blank_lines: true
/// ```
///
/// Command-line arguments take precedence over file values, see [`ScoutConfig::merge_with_cli`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoutConfig {
    /// Query tool binary
    #[serde(default = "default_tool")]
    pub tool: PathBuf,

    /// Extra arguments forwarded verbatim to the tool
    #[serde(default)]
    pub tool_args: Vec<String>,

    /// Maximum number of tool processes running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: NonZeroUsize,

    /// Server listen address; a bare `:port` listens on every interface
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Keep blank lines found inside a match body
    #[serde(default = "default_keep_blank_lines")]
    pub keep_blank_lines: bool,

    /// Prefix each printed match with `Match #n:`
    #[serde(default)]
    pub numbered: bool,

    /// Print a trailing `N matches.` line
    #[serde(default)]
    pub show_count: bool,

    /// Report only `binds here` locations instead of full match bodies
    #[serde(default)]
    pub locations_only: bool,
}

fn default_tool() -> PathBuf {
    PathBuf::from(DEFAULT_TOOL)
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_keep_blank_lines() -> bool {
    true
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            tool_args: Vec::new(),
            concurrency: default_concurrency(),
            listen: default_listen(),
            log_level: default_log_level(),
            keep_blank_lines: default_keep_blank_lines(),
            numbered: false,
            show_count: false,
            locations_only: false,
        }
    }
}

/// Overrides collected from the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub tool: Option<PathBuf>,
    pub tool_args: Vec<String>,
    pub concurrency: Option<NonZeroUsize>,
    pub listen: Option<String>,
    pub log_level: Option<String>,
    pub strip_blank_lines: bool,
    pub numbered: bool,
    pub show_count: bool,
    pub locations_only: bool,
}

impl ScoutConfig {
    /// Loads configuration from the default locations
    pub fn load() -> ScoutResult<Self> {
        Self::load_from(None)
    }

    /// Loads configuration, layering an explicit file over the default locations
    pub fn load_from(config_path: Option<&Path>) -> ScoutResult<Self> {
        let mut builder = ConfigBuilder::builder();

        // Default config locations
        let defaults = [
            // Global config
            dirs::config_dir().map(|p| p.join("clangscout/config.yaml")),
            // Local config
            Some(PathBuf::from(".clangscout.yaml")),
        ];

        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: CliOverrides) -> Self {
        if let Some(tool) = cli.tool {
            self.tool = tool;
        }
        if !cli.tool_args.is_empty() {
            self.tool_args = cli.tool_args;
        }
        if let Some(concurrency) = cli.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(listen) = cli.listen {
            self.listen = listen;
        }
        if let Some(log_level) = cli.log_level {
            self.log_level = log_level;
        }
        if cli.strip_blank_lines {
            self.keep_blank_lines = false;
        }
        if cli.numbered {
            self.numbered = true;
        }
        if cli.show_count {
            self.show_count = true;
        }
        if cli.locations_only {
            self.locations_only = true;
        }
        self
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            keep_blank_lines: self.keep_blank_lines,
        }
    }
}
