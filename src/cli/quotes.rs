use super::ui;
use crate::core::config::AppConfig;
use crate::download::{DownloadSettings, QuoteDownloader, RunSummary};
use crate::providers::ConnectionRegistry;
use crate::store::{ExchangeSymbolMap, MemoryInstrumentStore};
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(
    config: &AppConfig,
    store: &MemoryInstrumentStore,
    symbols: &ExchangeSymbolMap,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let local_offset = config.local_offset();
    let registry =
        ConnectionRegistry::from_config(&config.providers, config.request_timeout(), local_offset)?;
    let history = registry.select(config.download.history_connection.as_deref());
    let current = registry.select(config.download.current_price_connection.as_deref());
    debug!(?history, ?current, "Selected connections");

    let progress = ui::ProgressBarSink::new();
    let mut downloader = QuoteDownloader::new(
        store,
        symbols,
        &progress,
        DownloadSettings::from_config(config),
    )
    .with_history_connection(history)
    .with_current_price_connection(current)
    .with_cancellation(cancel);

    let summary = downloader.run().await;
    progress.finish();
    println!("{}", ui::summary_line(&summary));
    Ok(summary)
}
