mod cli;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::debug;

use beach_query_core::config::Config;
use beach_query_core::history::QueryHistory;
use beach_query_core::protocol::QueryParams;
use beach_query_core::render::{render_result_set, render_summary};
use beach_query_core::session::ResultStatus;
use beach_query_core::tabs::{FileTabStore, TabManager, TabStore};
use beach_query_core::telemetry::logging as logctl;
use beach_query_core::transport::HttpTransport;
use cli::{Cli, Command, ExecArgs, HistoryArgs};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).context("failed to configure logging")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let mut config = Config::from_env();
    if let Some(server) = cli.server {
        config = config.with_server(server);
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = Some(dir);
    }
    let store: Arc<dyn TabStore> = match &config.state_dir {
        Some(dir) => Arc::new(FileTabStore::new(dir)),
        None => Arc::new(FileTabStore::default_location()?),
    };

    match cli.command {
        Command::Exec(args) => handle_exec(&config, store, args).await,
        Command::Tabs => handle_tabs(&config, store),
        Command::History(args) => handle_history(store, args),
    }
}

fn open_manager(config: &Config, store: Arc<dyn TabStore>) -> Result<TabManager> {
    let transport = HttpTransport::new(config).context("failed to set up http transport")?;
    Ok(TabManager::new(store, Arc::new(transport)))
}

async fn handle_exec(config: &Config, store: Arc<dyn TabStore>, args: ExecArgs) -> Result<()> {
    let mut manager = open_manager(config, store)?;
    let tab_id = match args.tab.as_deref() {
        Some(key) => manager
            .find_tab(key)
            .map(|tab| tab.id().clone())
            .ok_or_else(|| anyhow!("no tab with id or title {key:?}"))?,
        None if args.new_tab => manager.new_tab(),
        None => manager.active_tab_id().clone(),
    };
    manager.set_active_tab(&tab_id)?;
    if let Some(query) = args.query.clone() {
        manager.change_input(&tab_id, query)?;
    }

    let text = manager
        .tab(&tab_id)
        .map(|tab| tab.input().to_string())
        .unwrap_or_default();
    if text.trim().is_empty() {
        bail!("tab {tab_id} has no query text; pass one as an argument");
    }

    let params = QueryParams::new(text, args.database.clone())
        .with_action(args.action)
        .with_settings(args.settings());
    let query_id = manager.dispatch_query(&tab_id, params)?;
    debug!(tab_id = %tab_id, query_id = %query_id, "waiting for query");

    let mut interrupted = false;
    loop {
        let running = manager
            .tab(&tab_id)
            .map(|tab| tab.session().is_active())
            .unwrap_or(false);
        if !running {
            break;
        }
        tokio::select! {
            outcome = manager.next_event() => {
                let Some(outcome) = outcome else { break };
                if let Some(location) = outcome.auth_redirect() {
                    bail!(
                        "authentication required{}",
                        location.map(|l| format!("; sign in at {l}")).unwrap_or_default()
                    );
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                manager.cancel_query(&tab_id)?;
                eprintln!("⏹️  query cancelled");
            }
        }
    }

    let result = manager
        .tab(&tab_id)
        .and_then(|tab| tab.result())
        .context("query produced no result")?;
    for (index, set) in result.result_sets().iter().enumerate() {
        if result.result_sets().len() > 1 {
            println!("# result set {index}");
        }
        print!("{}", render_result_set(set));
    }
    eprintln!("{}", render_summary(result));

    match result.status() {
        ResultStatus::Failed => bail!("query {query_id} failed"),
        _ => Ok(()),
    }
}

fn handle_tabs(config: &Config, store: Arc<dyn TabStore>) -> Result<()> {
    let manager = open_manager(config, store)?;
    for tab in manager.tabs() {
        let marker = if tab.id() == manager.active_tab_id() { "*" } else { " " };
        let dirty = if tab.is_dirty() { " (modified)" } else { "" };
        let title = if tab.title().is_empty() { "untitled" } else { tab.title() };
        let preview = tab.input().lines().next().unwrap_or("");
        println!("{marker} {}\t{title}{dirty}\t{preview}", tab.id());
    }
    Ok(())
}

fn handle_history(store: Arc<dyn TabStore>, args: HistoryArgs) -> Result<()> {
    let history = QueryHistory::new(store.load_history()?.unwrap_or_default());
    for entry in history.filtered(args.filter.as_deref().unwrap_or("")) {
        let duration = entry
            .duration_us
            .map(|us| format!("{:.3}s", us as f64 / 1_000_000.0))
            .unwrap_or_else(|| "-".to_string());
        println!("{}\t{duration}\t{}", entry.query_id, entry.query_text.replace('\n', " "));
    }
    Ok(())
}
