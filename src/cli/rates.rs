use super::ui;
use crate::core::config::AppConfig;
use crate::download::{RateDownloader, RunSummary};
use crate::providers::fx::FxConnection;
use crate::store::{ExchangeSymbolMap, MemoryInstrumentStore};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn run(
    config: &AppConfig,
    store: &MemoryInstrumentStore,
    symbols: &ExchangeSymbolMap,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let progress = ui::ProgressBarSink::new();
    let mut downloader =
        RateDownloader::new(store, symbols, &progress).with_cancellation(cancel);
    match &config.providers.fx {
        Some(fx) => {
            let connection = FxConnection::from_config(fx, config.request_timeout())?;
            downloader = downloader.with_connection(Arc::new(connection));
        }
        None => warn!("No exchange rate provider configured"),
    }

    let summary = downloader.run().await;
    progress.finish();
    println!("{}", ui::summary_line(&summary));
    Ok(summary)
}
