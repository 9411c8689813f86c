use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use beach_query_core::protocol::{
    QueryAction, QueryMode, QuerySettings, StatisticsMode, TracingLevel, TransactionMode,
};
use beach_query_core::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "beach-query",
    about = "Run streaming queries against a query server from persistent editor tabs",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Base URL of the query server (overrides BEACH_QUERY_SERVER)"
    )]
    pub server: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory holding tabs and history (overrides BEACH_QUERY_STATE_DIR)"
    )]
    pub state_dir: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "BEACH_QUERY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "BEACH_QUERY_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a query in a tab and print its result sets (Ctrl-C stops it)
    Exec(ExecArgs),
    /// List saved tabs
    Tabs,
    /// List recent queries
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[arg(long, short = 'd', env = "BEACH_QUERY_DATABASE", help = "Database path")]
    pub database: String,

    #[arg(long, value_name = "ID_OR_TITLE", help = "Tab to run in (defaults to the active tab)")]
    pub tab: Option<String>,

    #[arg(long, conflicts_with = "tab", help = "Open a new tab for this query")]
    pub new_tab: bool,

    #[arg(long, value_enum, default_value_t = QueryAction::Execute)]
    pub action: QueryAction,

    #[arg(long, value_enum)]
    pub mode: Option<QueryMode>,

    #[arg(long, value_enum)]
    pub stats: Option<StatisticsMode>,

    #[arg(long, value_enum)]
    pub tracing_level: Option<TracingLevel>,

    #[arg(long, value_enum, default_value_t = TransactionMode::Implicit)]
    pub transaction_mode: TransactionMode,

    #[arg(long)]
    pub limit_rows: Option<u64>,

    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Query text; replaces the tab's input. Without it the tab's input runs.
    pub query: Option<String>,
}

impl ExecArgs {
    pub fn settings(&self) -> QuerySettings {
        QuerySettings {
            mode: self.mode,
            statistics: self.stats,
            tracing_level: self.tracing_level,
            transaction_mode: self.transaction_mode,
            limit_rows: self.limit_rows,
            timeout_secs: self.timeout,
        }
    }
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Only show queries containing this text (case-insensitive)
    pub filter: Option<String>,
}
