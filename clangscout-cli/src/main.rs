use anyhow::{Context, Result};
use clangscout::{
    config::CliOverrides,
    oneshot::{run_once, ReportFormat},
    unquote_file, ClangQueryInvoker, Dispatcher, FileIssue, QueryServer, ScoutConfig, Workload,
};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::{io, num::NonZeroUsize, path::PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file layered over the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DispatchArgs {
    /// Source files to run the query against; quoted string literals are decoded
    files: Vec<String>,

    /// Arguments forwarded to the query tool after each file name
    #[arg(last = true)]
    tool_args: Vec<String>,

    /// Query tool to run (default: clang-query)
    #[arg(short, long)]
    tool: Option<PathBuf>,

    /// Maximum number of tool processes running at once
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Drop blank lines found inside match bodies
    #[arg(long)]
    strip_blank_lines: bool,

    /// Report only the locations of `binds here` notes
    #[arg(short = 'L', long)]
    locations: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one query from stdin and print every distinct match
    Query {
        #[command(flatten)]
        dispatch: DispatchArgs,

        /// Prefix each match with its sequence number
        #[arg(short, long)]
        number: bool,

        /// Print the total number of matches at the end
        #[arg(short, long)]
        count: bool,
    },

    /// Answer one query per TCP connection with a JSON list of matches
    Serve {
        #[command(flatten)]
        dispatch: DispatchArgs,

        /// Address to listen on (default: :3333)
        #[arg(short, long)]
        listen: Option<String>,
    },
}

impl DispatchArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            tool: self.tool.clone(),
            tool_args: self.tool_args.clone(),
            concurrency: self.threads,
            strip_blank_lines: self.strip_blank_lines,
            locations_only: self.locations,
            ..Default::default()
        }
    }

    fn workload(&self, config: &ScoutConfig) -> Workload {
        let files = self.files.iter().map(|f| unquote_file(f)).collect();
        Workload::new(files, config.tool_args.clone())
    }
}

fn main() -> Result<()> {
    run()
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Query {
            dispatch,
            number,
            count,
        } => {
            let overrides = CliOverrides {
                log_level: cli.log_level,
                numbered: number,
                show_count: count,
                ..dispatch.overrides()
            };
            let config = load_config(cli.config, overrides)?;
            let workload = dispatch.workload(&config);
            let format = ReportFormat {
                numbered: config.numbered,
                show_count: config.show_count,
                locations_only: config.locations_only,
            };

            let stdin = io::stdin();
            let stdout = io::stdout();
            let summary = run_once(
                &build_dispatcher(&config),
                &workload,
                &mut stdin.lock(),
                &mut stdout.lock(),
                format,
            )?;

            debug!("Round stats: {:?}", summary.stats);
            print_issues(&summary.issues);
            Ok(())
        }
        Commands::Serve { dispatch, listen } => {
            let overrides = CliOverrides {
                log_level: cli.log_level,
                listen,
                ..dispatch.overrides()
            };
            let config = load_config(cli.config, overrides)?;
            let workload = dispatch.workload(&config);

            let server = QueryServer::bind(&config.listen, build_dispatcher(&config), workload)
                .with_context(|| format!("Could not start server on {}", config.listen))?
                .with_locations_only(config.locations_only);

            server.serve()?;
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>, overrides: CliOverrides) -> Result<ScoutConfig> {
    let config = ScoutConfig::load_from(path.as_deref())
        .context("Failed to load configuration")?
        .merge_with_cli(overrides);
    init_logging(&config.log_level);
    Ok(config)
}

fn init_logging(level: &str) {
    // Log to stderr to keep stdout clean for results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_dispatcher(config: &ScoutConfig) -> Dispatcher<ClangQueryInvoker> {
    Dispatcher::new(ClangQueryInvoker::new(&config.tool))
        .with_concurrency(config.concurrency)
        .with_parse_options(config.parse_options())
}

fn print_issues(issues: &[(String, FileIssue)]) {
    for (file, issue) in issues {
        eprintln!("{} {}: {}", "warning:".yellow().bold(), file.blue(), issue);
    }
}
