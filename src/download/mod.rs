//! Runs that walk the instrument table and download prices or rates for it.

pub mod quotes;
pub mod rates;

pub use quotes::{DownloadSettings, QuoteDownloader};
pub use rates::RateDownloader;

use crate::core::{DownloadError, DownloadResult, ProgressSink};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Lifecycle of one download run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunState {
    Idle,
    Running(f32),
    Completed,
    Failed,
    Cancelled,
}

/// Per-instrument tallies of a run.
///
/// Every processed instrument lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub skipped: usize,
    pub errored: usize,
    pub succeeded: usize,
}

impl RunCounters {
    pub fn record(&mut self, result: &DownloadResult) {
        if result.skipped {
            self.skipped += 1;
        } else if result.is_errored() {
            self.errored += 1;
        } else {
            self.succeeded += 1;
        }
    }

    pub fn is_all_clear(&self) -> bool {
        self.skipped == 0 && self.errored == 0 && self.succeeded == 0
    }

    pub fn total(&self) -> usize {
        self.skipped + self.errored + self.succeeded
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub state: RunState,
    pub counters: RunCounters,
    pub message: String,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// Fraction of the table processed before entry `index`, never below 0.01.
pub fn progress_fraction(index: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.01;
    }
    (index as f32 / total as f32).max(0.01)
}

/// Races a provider call against the run's cancellation token.
pub(crate) async fn cancellable<T, F>(
    token: &CancellationToken,
    instrument: &str,
    fetch: F,
) -> Result<T, DownloadError>
where
    F: Future<Output = Result<T, DownloadError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DownloadError::Cancelled {
            instrument: instrument.to_string(),
        }),
        result = fetch => result,
    }
}

/// How the instrument loop of a run ended, short of an unexpected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopEnd {
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DownloadKind {
    SecurityPrices,
    ExchangeRates,
}

impl DownloadKind {
    fn subject(self) -> &'static str {
        match self {
            DownloadKind::SecurityPrices => "security prices",
            DownloadKind::ExchangeRates => "exchange rates",
        }
    }

    fn completion_message(self, counters: &RunCounters) -> String {
        if counters.is_all_clear() {
            return format!("Finished downloading {}", self.subject());
        }
        let (update, obtained) = match self {
            DownloadKind::SecurityPrices => ("Security price", "quotes"),
            DownloadKind::ExchangeRates => ("Exchange rate", "rates"),
        };
        format!(
            "{} update complete with {} skipped, {} errors and {} {} obtained",
            update, counters.skipped, counters.errored, counters.succeeded, obtained
        )
    }
}

/// Turns the end of an instrument loop into the run's final state and message.
pub(crate) fn finish_run(
    kind: DownloadKind,
    outcome: anyhow::Result<LoopEnd>,
    counters: RunCounters,
    progress: &dyn ProgressSink,
) -> RunSummary {
    let (state, message) = match outcome {
        Ok(LoopEnd::Finished) => {
            let message = kind.completion_message(&counters);
            info!("{}", message);
            progress.report(1.0, &message);
            (RunState::Completed, message)
        }
        Ok(LoopEnd::Cancelled) => {
            let message = format!(
                "Download of {} cancelled after {} instruments",
                kind.subject(),
                counters.total()
            );
            info!("{}", message);
            progress.report(0.0, &message);
            (RunState::Cancelled, message)
        }
        Err(e) => {
            let message = format!("Error downloading {}: {:#}", kind.subject(), e);
            error!("{}", message);
            progress.report(0.0, &message);
            (RunState::Failed, message)
        }
    };
    RunSummary {
        state,
        counters,
        message,
    }
}
