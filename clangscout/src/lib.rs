pub mod config;
pub mod dispatch;
pub mod errors;
pub mod invoker;
pub mod metrics;
pub mod oneshot;
pub mod parser;
pub mod results;
pub mod server;

pub use config::ScoutConfig;
pub use dispatch::{unquote_file, DispatchJob, DispatchOutcome, Dispatcher, Workload};
pub use errors::{ScoutError, ScoutResult};
pub use invoker::{ClangQueryInvoker, Invocation, QueryInvoker};
pub use parser::{parse_matches, parse_matches_with, ParseOptions};
pub use results::{FileIssue, Match, MatchSet, QueryResponse};
pub use server::QueryServer;
