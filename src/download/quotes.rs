use crate::core::config::AppConfig;
use crate::core::reconcile::{
    CommitOutcome, PriceReconciler, commit_price, correct_exchange_time, price_display_text,
    price_log_text, resolve_price_currency, to_base_rate,
};
use crate::core::{
    DateRange, DownloadError, DownloadResult, FetchOutcome, Instrument, InstrumentKind,
    InstrumentStore, ProgressSink, StockHistory, SymbolMap,
};
use crate::download::{
    DownloadKind, LoopEnd, RunCounters, RunState, RunSummary, cancellable, finish_run,
    progress_fraction,
};
use crate::providers::{Connection, ConnectionChoice, QuoteRequest};
use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Knobs of a security price run.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSettings {
    pub history_days: u32,
    pub history_enabled: bool,
    pub current_price_enabled: bool,
    /// Keep history records outside the requested range.
    pub full_history: bool,
    pub local_offset: FixedOffset,
    /// Last day of the history range, today when unset.
    pub reference_date: Option<NaiveDate>,
}

impl DownloadSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        DownloadSettings {
            history_days: config.history_days,
            history_enabled: config.download.history,
            current_price_enabled: config.download.current_price,
            full_history: true,
            local_offset: config.local_offset(),
            reference_date: None,
        }
    }

    pub fn date_range(&self) -> DateRange {
        let end = self
            .reference_date
            .unwrap_or_else(|| Utc::now().with_timezone(&self.local_offset).date_naive());
        DateRange::new(end, self.history_days)
    }

    fn local_date(&self, date_time: DateTime<Utc>) -> NaiveDate {
        date_time.with_timezone(&self.local_offset).date_naive()
    }
}

/// Downloads the price of every tracked security in the instrument table.
pub struct QuoteDownloader<'a> {
    store: &'a dyn InstrumentStore,
    symbols: &'a dyn SymbolMap,
    progress: &'a dyn ProgressSink,
    settings: DownloadSettings,
    history: ConnectionChoice,
    current: ConnectionChoice,
    cancel: CancellationToken,
    state: RunState,
}

impl<'a> QuoteDownloader<'a> {
    pub fn new(
        store: &'a dyn InstrumentStore,
        symbols: &'a dyn SymbolMap,
        progress: &'a dyn ProgressSink,
        settings: DownloadSettings,
    ) -> Self {
        QuoteDownloader {
            store,
            symbols,
            progress,
            settings,
            history: ConnectionChoice::NotConfigured,
            current: ConnectionChoice::NotConfigured,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    pub fn with_history_connection(mut self, choice: ConnectionChoice) -> Self {
        self.history = choice;
        self
    }

    pub fn with_current_price_connection(mut self, choice: ConnectionChoice) -> Self {
        self.current = choice;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs the download to the end.
    ///
    /// Provider failures are tallied per security. Only a failing write to
    /// the instrument store ends the run early, in which case prices that
    /// were already committed stay committed.
    pub async fn run(&mut self) -> RunSummary {
        info!("Downloading security prices");
        self.state = RunState::Running(0.0);
        self.progress.report(0.0, "Downloading security prices");

        let mut counters = RunCounters::default();
        let outcome = self.download_all(&mut counters).await;
        self.store.fire_change_notification();

        let summary = finish_run(DownloadKind::SecurityPrices, outcome, counters, self.progress);
        self.state = summary.state;
        summary
    }

    async fn download_all(&mut self, counters: &mut RunCounters) -> Result<LoopEnd> {
        let instruments = self.store.instruments();
        let total = instruments.len();

        for (index, instrument) in instruments.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(LoopEnd::Cancelled);
            }
            let percent = progress_fraction(index, total);
            self.state = RunState::Running(percent);
            if instrument.kind != InstrumentKind::Security {
                continue;
            }

            let result = self.update_security(instrument, percent).await?;
            if self.cancel.is_cancelled() {
                // A security interrupted mid-download is not counted
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

    #[instrument(skip_all, fields(security = %instrument.name))]
    async fn update_security(
        &self,
        instrument: &Instrument,
        percent: f32,
    ) -> Result<DownloadResult> {
        let name = instrument.name.as_str();
        if !self.symbols.is_tracked(instrument) {
            return Ok(DownloadResult::skip(
                name,
                format!("Skipping untracked security {name}"),
            ));
        }

        let range = self.settings.date_range();
        let exchange = self.symbols.exchange_for(instrument);
        let request = QuoteRequest {
            instrument_id: instrument.id.clone(),
            name: name.to_string(),
            ticker: instrument.ticker.clone(),
            exchange: exchange.clone(),
        };
        self.progress.report(percent, &format!("Downloading {name}"));
        debug!("Downloading price of {} for dates {}", name, range);

        let mut result = DownloadResult::new(name);
        let mut reconciler = PriceReconciler::new();
        let mut price_connection: Option<Arc<dyn Connection>> = None;
        let mut attempted = false;

        if self.settings.history_enabled {
            match &self.history {
                ConnectionChoice::Selected(connection) if connection.can_get_history() => {
                    attempted = true;
                    let fetch = connection.get_history(&request, &range, self.settings.full_history);
                    match cancellable(&self.cancel, name, fetch).await {
                        Ok(FetchOutcome::Empty) => {
                            return Ok(DownloadResult::skip(
                                name,
                                format!("No history obtained for security {name}"),
                            ));
                        }
                        Ok(FetchOutcome::Data(history)) => {
                            result.history_error_count = history.error_count();
                            result.history_record_count = history.record_count();
                            if history.record_count() > 0 {
                                result.history_result = Some("Success".to_string());
                                self.save_history(instrument, connection.as_ref(), &request, &history)?;
                                if reconciler.offer_history(&history) {
                                    price_connection = Some(connection.clone());
                                }
                            } else {
                                result.history_result = Some("Error".to_string());
                                result.set_log_if_empty(format!(
                                    "No history records returned for security {name}"
                                ));
                            }
                        }
                        Err(e) => self.record_history_error(&mut result, &e, percent),
                    }
                }
                ConnectionChoice::Unavailable(id) => {
                    attempted = true;
                    let e = DownloadError::ConnectionUnavailable {
                        instrument: name.to_string(),
                        connection: id.clone(),
                    };
                    self.record_history_error(&mut result, &e, percent);
                }
                _ => {}
            }
        }

        if self.settings.current_price_enabled {
            match &self.current {
                ConnectionChoice::Selected(connection) if connection.can_get_current_price() => {
                    attempted = true;
                    // Without a historical price the quote doubles as today's history entry
                    let auto_save = !reconciler.has_candidate();
                    if auto_save {
                        debug!("Automatically saving current price of {}", name);
                    }
                    let fetch = connection.get_current_price(&request, auto_save);
                    match cancellable(&self.cancel, name, fetch).await {
                        Ok(FetchOutcome::Empty) => {
                            return Ok(DownloadResult::skip(
                                name,
                                format!("No current price obtained for security {name}"),
                            ));
                        }
                        Ok(FetchOutcome::Data(record)) => {
                            result.current_error = !record.is_valid();
                            result.current_result = Some(record.price_display.clone());
                            if !result.current_error {
                                let corrected = correct_exchange_time(
                                    record.date_time,
                                    exchange.as_ref(),
                                    self.settings.local_offset,
                                );
                                reconciler.offer_current(&record, corrected);
                                price_connection = Some(connection.clone());
                                if auto_save {
                                    let currency = resolve_price_currency(
                                        self.store,
                                        instrument,
                                        Some(connection.as_ref()),
                                        &request,
                                    );
                                    self.store.add_price_snapshot(
                                        &instrument.id,
                                        self.settings.local_date(corrected),
                                        to_base_rate(record.close_rate, &currency),
                                    )?;
                                }
                            }
                        }
                        Err(e) => self.record_current_error(&mut result, &e, percent),
                    }
                }
                ConnectionChoice::Unavailable(id) => {
                    attempted = true;
                    let e = DownloadError::ConnectionUnavailable {
                        instrument: name.to_string(),
                        connection: id.clone(),
                    };
                    self.record_current_error(&mut result, &e, percent);
                }
                _ => {}
            }
        }

        if !attempted {
            return Ok(DownloadResult::skip(
                name,
                format!("No connection selected for security {name}"),
            ));
        }

        if let Some(candidate) = reconciler.candidate() {
            let price_currency = resolve_price_currency(
                self.store,
                instrument,
                price_connection.as_deref(),
                &request,
            );
            let outcome = commit_price(self.store, &instrument.id, candidate, &price_currency)?;
            let updated = outcome == CommitOutcome::Updated;
            if let CommitOutcome::Stale { stored } = outcome {
                debug!(
                    "Current price update time {} not less than downloaded time {} for {}",
                    DateTime::from_timestamp_millis(stored).unwrap_or_default(),
                    candidate.date_time,
                    name
                );
            }

            self.progress.report(
                percent,
                &price_display_text(
                    &price_currency,
                    name,
                    candidate.price,
                    candidate.date_time,
                    self.settings.local_offset,
                ),
            );
            result.set_log_if_empty(price_log_text(
                &price_currency,
                name,
                candidate.price,
                candidate.date_time,
                self.settings.local_offset,
                updated,
            ));
        }
        Ok(result)
    }

    /// Stores every valid history record as a dated snapshot in base terms.
    fn save_history(
        &self,
        instrument: &Instrument,
        connection: &dyn Connection,
        request: &QuoteRequest,
        history: &StockHistory,
    ) -> Result<()> {
        let currency = resolve_price_currency(self.store, instrument, Some(connection), request);
        for record in history.records().iter().filter(|r| r.is_valid()) {
            self.store.add_price_snapshot(
                &instrument.id,
                self.settings.local_date(record.date_time),
                to_base_rate(record.close_rate, &currency),
            )?;
        }
        Ok(())
    }

    fn record_history_error(&self, result: &mut DownloadResult, e: &DownloadError, percent: f32) {
        self.progress.report(
            percent,
            &format!("Error downloading historical prices for {}: {}", e.instrument(), e),
        );
        result.history_error_count = result.history_error_count.max(1);
        result.history_result = Some(e.to_string());
        result.set_log_if_empty(format!(
            "Error downloading historical prices for {}: {}",
            e.instrument(),
            e
        ));
    }

    fn record_current_error(&self, result: &mut DownloadResult, e: &DownloadError, percent: f32) {
        self.progress.report(
            percent,
            &format!("Error downloading current price for {}: {}", e.instrument(), e),
        );
        result.current_error = true;
        result.current_result = Some(e.to_string());
        result.set_log_if_empty(format!(
            "Error downloading current price for {}: {}",
            e.instrument(),
            e
        ));
    }
}
