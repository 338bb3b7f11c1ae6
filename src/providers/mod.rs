//! Pluggable price data sources.
//!
//! Each provider implements [`Connection`] and declares which operations it
//! supports. Callers must check [`Connection::can_get_history`] and
//! [`Connection::can_get_current_price`] before calling the matching method.

pub mod fx;
pub mod google;
pub mod registry;
pub mod util;
pub mod yahoo;

use crate::core::{DateRange, DownloadError, Exchange, ExchangeRate, FetchOutcome, StockHistory, StockRecord};
use async_trait::async_trait;

pub use registry::{ConnectionChoice, ConnectionRegistry};

/// Everything a provider needs to know about the instrument it fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub instrument_id: String,
    pub name: String,
    pub ticker: Option<String>,
    pub exchange: Option<Exchange>,
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identifier used in configuration, e.g. "yahoo".
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &str;

    fn can_get_history(&self) -> bool;

    fn can_get_current_price(&self) -> bool;

    /// Downloads daily closing prices over `range`.
    ///
    /// Lines that cannot be parsed are counted in the history's error tally
    /// rather than failing the whole download.
    async fn get_history(
        &self,
        request: &QuoteRequest,
        range: &DateRange,
        full_history: bool,
    ) -> Result<FetchOutcome<StockHistory>, DownloadError> {
        let _ = (range, full_history);
        Err(DownloadError::NotSupported {
            instrument: request.name.clone(),
            provider: self.display_name().to_string(),
            operation: "price history",
        })
    }

    /// Downloads the latest quote.
    ///
    /// `auto_save_as_history` is set when the caller will also record this
    /// quote as a history entry.
    async fn get_current_price(
        &self,
        request: &QuoteRequest,
        auto_save_as_history: bool,
    ) -> Result<FetchOutcome<StockRecord>, DownloadError> {
        let _ = auto_save_as_history;
        Err(DownloadError::NotSupported {
            instrument: request.name.clone(),
            provider: self.display_name().to_string(),
            operation: "current prices",
        })
    }

    /// ISO code of the currency this provider quotes the instrument in.
    fn get_price_currency(&self, request: &QuoteRequest) -> Option<String>;

    /// Normalizes a user-entered ticker for this provider, `None` when blank.
    fn get_full_ticker_symbol(&self, raw_symbol: &str, exchange: Option<&Exchange>)
    -> Option<String>;
}

/// Source of currency exchange rates.
#[async_trait]
pub trait RateConnection: Send + Sync {
    fn id(&self) -> &'static str;

    /// Rate of `currency` per unit of `base_currency`.
    async fn get_current_rate(
        &self,
        currency: &str,
        base_currency: &str,
    ) -> Result<FetchOutcome<ExchangeRate>, DownloadError>;
}
