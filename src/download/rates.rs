use crate::core::market::PRICE_DATE_TAG;
use crate::core::{
    DownloadResult, FetchOutcome, Instrument, InstrumentKind, InstrumentStore, ProgressSink,
    SymbolMap,
};
use crate::download::{
    DownloadKind, LoopEnd, RunCounters, RunState, RunSummary, cancellable, finish_run,
    progress_fraction,
};
use crate::providers::RateConnection;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Downloads the exchange rate of every tracked non-base currency.
pub struct RateDownloader<'a> {
    store: &'a dyn InstrumentStore,
    symbols: &'a dyn SymbolMap,
    progress: &'a dyn ProgressSink,
    connection: Option<Arc<dyn RateConnection>>,
    cancel: CancellationToken,
    state: RunState,
}

impl<'a> RateDownloader<'a> {
    pub fn new(
        store: &'a dyn InstrumentStore,
        symbols: &'a dyn SymbolMap,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        RateDownloader {
            store,
            symbols,
            progress,
            connection: None,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    pub fn with_connection(mut self, connection: Arc<dyn RateConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn run(&mut self) -> RunSummary {
        info!("Downloading exchange rates");
        self.state = RunState::Running(0.0);
        self.progress.report(0.0, "Downloading exchange rates");

        let mut counters = RunCounters::default();
        let outcome = self.download_all(&mut counters).await;
        self.store.fire_change_notification();

        let summary = finish_run(DownloadKind::ExchangeRates, outcome, counters, self.progress);
        self.state = summary.state;
        summary
    }

    async fn download_all(&mut self, counters: &mut RunCounters) -> Result<LoopEnd> {
        let base = self.store.base_currency();
        let instruments = self.store.instruments();
        let total = instruments.len();
        let run_time = Utc::now().timestamp_millis().to_string();

        for (index, instrument) in instruments.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(LoopEnd::Cancelled);
            }
            let percent = progress_fraction(index, total);
            self.state = RunState::Running(percent);
            if instrument.kind != InstrumentKind::Currency || instrument.id == base.id {
                continue;
            }

            let result = self
                .update_currency(instrument, &base.code, &run_time, percent)
                .await?;
            if self.cancel.is_cancelled() {
                return Ok(LoopEnd::Cancelled);
            }
            counters.record(&result);
            if !result.skipped {
                if let Some(message) = &result.log_message {
                    info!("{}", message);
                }
            }
        }
        Ok(LoopEnd::Finished)
    }

    #[instrument(skip_all, fields(currency = %currency.name))]
    async fn update_currency(
        &self,
        currency: &Instrument,
        base_code: &str,
        run_time: &str,
        percent: f32,
    ) -> Result<DownloadResult> {
        let name = currency.name.as_str();
        if !self.symbols.is_tracked(currency) {
            return Ok(DownloadResult::skip(
                name,
                format!("Skipping untracked currency {name}"),
            ));
        }
        let Some(connection) = &self.connection else {
            return Ok(DownloadResult::skip(
                name,
                format!("No connection selected for currency {name}"),
            ));
        };
        let code = currency.currency_code.as_deref().unwrap_or(&currency.id);
        self.progress.report(percent, &format!("Downloading {name}"));

        let mut result = DownloadResult::new(name);
        let fetch = connection.get_current_rate(code, base_code);
        match cancellable(&self.cancel, name, fetch).await {
            Ok(FetchOutcome::Empty) => {
                return Ok(DownloadResult::skip(
                    name,
                    format!("No exchange rate obtained for currency {name}"),
                ));
            }
            Ok(FetchOutcome::Data(rate)) if rate.rate > 0.0 => {
                debug!("Rate of {} per {} is {}", rate.currency, base_code, rate.rate);
                self.store.set_rate(&currency.id, rate.rate)?;
                self.store.set_tag(&currency.id, PRICE_DATE_TAG, run_time)?;
                let message = format!(
                    "Exchange rate for {}: 1 {} = {:.4} {}",
                    name, base_code, rate.rate, rate.currency
                );
                self.progress.report(percent, &message);
                result.current_result = Some(rate.rate.to_string());
                result.set_log_if_empty(message);
            }
            Ok(FetchOutcome::Data(rate)) => {
                result.current_error = true;
                result.current_result = Some(rate.rate.to_string());
                result.set_log_if_empty(format!(
                    "Invalid exchange rate {} downloaded for {}",
                    rate.rate, name
                ));
            }
            Err(e) => {
                let message = format!("Error downloading exchange rate for {}: {}", name, e);
                self.progress.report(percent, &message);
                result.current_error = true;
                result.current_result = Some(e.to_string());
                result.set_log_if_empty(message);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DownloadError, ExchangeRate};
    use crate::download::testing::RecordingProgress;
    use crate::store::{ExchangeSymbolMap, MemoryInstrumentStore};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Answers from a fixed table, an absent code is a server error.
    struct FakeRates {
        rates: BTreeMap<&'static str, Option<f64>>,
        requests: Mutex<Vec<(String, String)>>,
    }

    impl FakeRates {
        fn new(rates: &[(&'static str, Option<f64>)]) -> Arc<Self> {
            Arc::new(FakeRates {
                rates: rates.iter().cloned().collect(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RateConnection for FakeRates {
        fn id(&self) -> &'static str {
            "fake"
        }

        async fn get_current_rate(
            &self,
            currency: &str,
            base_currency: &str,
        ) -> Result<FetchOutcome<ExchangeRate>, DownloadError> {
            self.requests
                .lock()
                .unwrap()
                .push((currency.to_string(), base_currency.to_string()));
            match self.rates.get(currency) {
                Some(Some(rate)) => Ok(FetchOutcome::Data(ExchangeRate {
                    currency: currency.to_string(),
                    rate: *rate,
                })),
                Some(None) => Ok(FetchOutcome::Empty),
                None => Err(DownloadError::HttpStatus {
                    instrument: currency.to_string(),
                    status: reqwest::StatusCode::BAD_GATEWAY,
                }),
            }
        }
    }

    fn store() -> MemoryInstrumentStore {
        let store = MemoryInstrumentStore::new("EUR");
        store.insert_currency("EUR", "EUR", "Euro", 2, 1.0);
        store.insert_currency("USD", "USD", "US Dollar", 2, 1.0);
        store.insert_currency("GBP", "GBP", "British Pound", 2, 1.0);
        store.insert_currency("JPY", "JPY", "Japanese Yen", 0, 1.0);
        store.insert_currency("CHF", "CHF", "Swiss Franc", 2, 1.0);
        store.insert_currency("XAU", "XAU", "Gold", 4, 1.0);
        store.insert_security("aapl", "Apple", Some("AAPL"), None);
        store
    }

    fn symbols() -> ExchangeSymbolMap {
        let mut symbols = ExchangeSymbolMap::new();
        for id in ["EUR", "USD", "GBP", "JPY", "CHF", "aapl"] {
            symbols.track(id);
        }
        symbols
    }

    #[tokio::test]
    async fn test_rates_are_committed_and_tallied() {
        let store = store();
        let symbols = symbols();
        let progress = RecordingProgress::default();
        let fx = FakeRates::new(&[
            ("USD", Some(1.0842)),
            ("GBP", Some(0.0)),
            ("JPY", None),
        ]);

        let mut downloader =
            RateDownloader::new(&store, &symbols, &progress).with_connection(fx.clone());
        let summary = downloader.run().await;

        assert_eq!(summary.state, RunState::Completed);
        // GBP rate of 0 and CHF server error are errors, JPY empty and XAU untracked are skipped
        assert_eq!(
            summary.counters,
            RunCounters { skipped: 2, errored: 2, succeeded: 1 }
        );
        assert_eq!(
            summary.message,
            "Exchange rate update complete with 2 skipped, 2 errors and 1 rates obtained"
        );
        assert_eq!(store.rate("USD"), Some(1.0842));
        assert!(store.tag("USD", PRICE_DATE_TAG).is_some());
        assert_eq!(store.rate("GBP"), Some(1.0));
        assert!(store.tag("GBP", PRICE_DATE_TAG).is_none());
        assert_eq!(store.base_currency().rate, 1.0);

        // The base currency and securities are never requested
        let requests = fx.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|(cur, base)| cur != "EUR" && base == "EUR"));
        assert_eq!(store.notification_count(), 1);
    }

    #[tokio::test]
    async fn test_without_connection_every_currency_is_skipped() {
        let store = store();
        let symbols = symbols();
        let progress = RecordingProgress::default();

        let summary = RateDownloader::new(&store, &symbols, &progress).run().await;

        assert_eq!(summary.counters.skipped, 5);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = store();
        let symbols = symbols();
        let progress = RecordingProgress::default();
        let fx = FakeRates::new(&[("USD", Some(1.1))]);
        let token = CancellationToken::new();
        token.cancel();

        let mut downloader = RateDownloader::new(&store, &symbols, &progress)
            .with_connection(fx.clone())
            .with_cancellation(token);
        let summary = downloader.run().await;

        assert_eq!(summary.state, RunState::Cancelled);
        assert_eq!(downloader.state(), RunState::Cancelled);
        assert!(fx.requests.lock().unwrap().is_empty());
    }
}
