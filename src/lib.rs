pub mod cli;
pub mod core;
pub mod download;
pub mod providers;
pub mod store;

use crate::core::config::AppConfig;
use crate::download::{RunState, RunSummary};
use crate::store::{ExchangeSymbolMap, MemoryInstrumentStore, StateStore};
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub enum AppCommand {
    Quotes,
    Rates,
    Show,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("quotesync starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = MemoryInstrumentStore::from_config(&config)?;
    let symbols = ExchangeSymbolMap::from_config(&config)?;
    let state = StateStore::open(&config.default_data_path()?)?;
    let restored = state.restore_into(&store)?;
    debug!("Restored {} instrument states", restored);

    let summary = match command {
        AppCommand::Show => {
            cli::show::run(&store, config.local_offset());
            return Ok(());
        }
        AppCommand::Quotes => {
            with_interrupt(|cancel| cli::quotes::run(&config, &store, &symbols, cancel)).await?
        }
        AppCommand::Rates => {
            with_interrupt(|cancel| cli::rates::run(&config, &store, &symbols, cancel)).await?
        }
    };

    // Whatever was committed before a failure is kept
    state.save_from(&store)?;

    if summary.state == RunState::Failed {
        anyhow::bail!("{}", summary.message);
    }
    Ok(())
}

/// Runs a download that is cancelled on Ctrl-C.
async fn with_interrupt<F, Fut>(download: F) -> Result<RunSummary>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<RunSummary>>,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping download");
            token.cancel();
        }
    });

    let result = download(cancel).await;
    watcher.abort();
    result
}
