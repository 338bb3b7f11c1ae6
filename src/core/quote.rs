//! Price observations and per-instrument download results

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt::Display;

/// A span of days ending at a reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    end: NaiveDate,
    num_days: u32,
}

impl DateRange {
    pub fn new(end: NaiveDate, num_days: u32) -> Self {
        Self { end, num_days }
    }

    pub fn start(&self) -> NaiveDate {
        self.end - Duration::days(i64::from(self.num_days))
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn num_days(&self) -> u32 {
        self.num_days
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start() && date <= self.end
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start(), self.end)
    }
}

/// One price observation as returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct StockRecord {
    /// Price of one unit, in the provider's price currency.
    pub close_rate: f64,
    pub date_time: DateTime<Utc>,
    pub price_display: String,
}

impl StockRecord {
    pub fn new(close_rate: f64, date_time: DateTime<Utc>, price_display: impl Into<String>) -> Self {
        Self {
            close_rate,
            date_time,
            price_display: price_display.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.close_rate.is_finite() && self.close_rate > 0.0
    }
}

/// Historical prices of one instrument over one date range.
#[derive(Debug, Clone, Default)]
pub struct StockHistory {
    records: Vec<StockRecord>,
    error_count: usize,
}

impl StockHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: StockRecord) {
        self.records.push(record);
    }

    /// Counts a line that could not be turned into a record.
    pub fn add_error(&mut self) {
        self.error_count += 1;
    }

    pub fn records(&self) -> &[StockRecord] {
        &self.records
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn sort_by_date(&mut self) {
        self.records.sort_by_key(|r| r.date_time);
    }

    pub fn find_most_recent_valid_record(&self) -> Option<&StockRecord> {
        self.records
            .iter()
            .filter(|r| r.is_valid())
            .max_by_key(|r| r.date_time)
    }
}

/// A currency rate relative to a base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRate {
    pub currency: String,
    pub rate: f64,
}

/// Successful provider response: either data, or nothing to report.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Data(T),
    Empty,
}

impl<T> FetchOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            FetchOutcome::Data(value) => Some(value),
            FetchOutcome::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FetchOutcome::Empty)
    }
}

/// What happened to one instrument during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadResult {
    pub display_name: String,
    pub skipped: bool,
    pub history_error_count: usize,
    pub history_record_count: usize,
    pub history_result: Option<String>,
    pub current_error: bool,
    pub current_result: Option<String>,
    pub log_message: Option<String>,
}

impl DownloadResult {
    pub fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            ..Self::default()
        }
    }

    pub fn skip(display_name: &str, log_message: impl Into<String>) -> Self {
        Self {
            skipped: true,
            log_message: Some(log_message.into()),
            ..Self::new(display_name)
        }
    }

    pub fn is_errored(&self) -> bool {
        !self.skipped && (self.current_error || self.history_error_count > 0)
    }

    pub fn is_succeeded(&self) -> bool {
        !self.skipped && !self.is_errored()
    }

    /// Keeps the first log message, later ones are only traced.
    pub fn set_log_if_empty(&mut self, message: impl Into<String>) {
        if self.log_message.is_none() {
            self.log_message = Some(message.into());
        }
    }
}
