use anyhow::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::{DateRange, DownloadError, Exchange, FetchOutcome, StockHistory};
use crate::providers::util::{
    HistoryFormat, build_client, fetch_text, parse_history_csv, split_currency_override,
};
use crate::providers::{Connection, QuoteRequest};

pub const ID: &str = "google";

const HISTORY_FORMAT: HistoryFormat = HistoryFormat {
    // Date,Open,High,Low,Close,Volume with dates like 17-Jun-10
    date_format: "%d-%b-%y",
    close_index: 4,
};

/// History-only connection. Tickers are spelled `EXCHANGE:SYMBOL`.
pub struct GoogleConnection {
    history_url: String,
    client: Client,
    local_offset: FixedOffset,
}

fn url_date(date: NaiveDate) -> String {
    date.format("%b+%-d,+%Y").to_string()
}

impl GoogleConnection {
    pub fn new(history_url: &str, timeout: Duration, local_offset: FixedOffset) -> Result<Self> {
        Ok(GoogleConnection {
            history_url: history_url.to_string(),
            client: build_client(timeout)?,
            local_offset,
        })
    }

    pub fn history_url(&self, symbol: &str, range: &DateRange) -> String {
        format!(
            "{}?q={}&startdate={}&enddate={}&output=csv",
            self.history_url,
            urlencoding::encode(symbol),
            url_date(range.start()),
            url_date(range.end())
        )
    }
}

#[async_trait]
impl Connection for GoogleConnection {
    fn id(&self) -> &'static str {
        ID
    }

    fn display_name(&self) -> &str {
        "Google Finance"
    }

    fn can_get_history(&self) -> bool {
        true
    }

    fn can_get_current_price(&self) -> bool {
        false
    }

    #[instrument(
        name = "GoogleHistoryFetch",
        skip(self, request, range),
        fields(instrument = %request.name)
    )]
    async fn get_history(
        &self,
        request: &QuoteRequest,
        range: &DateRange,
        full_history: bool,
    ) -> Result<FetchOutcome<StockHistory>, DownloadError> {
        let symbol = request
            .ticker
            .as_deref()
            .and_then(|t| self.get_full_ticker_symbol(t, request.exchange.as_ref()))
            .ok_or_else(|| DownloadError::MissingSymbol {
                instrument: request.name.clone(),
            })?;
        let url = self.history_url(&symbol, range);

        let Some(body) = fetch_text(&self.client, &url, &request.name).await? else {
            return Ok(FetchOutcome::Empty);
        };
        let history = parse_history_csv(&body, HISTORY_FORMAT, range, full_history, self.local_offset);
        debug!(
            "Parsed {} history records with {} errors for {}",
            history.record_count(),
            history.error_count(),
            symbol
        );
        Ok(FetchOutcome::Data(history))
    }

    fn get_price_currency(&self, request: &QuoteRequest) -> Option<String> {
        if let Some(ticker) = request.ticker.as_deref() {
            let upper = ticker.trim().to_uppercase();
            if let (_, Some(code)) = split_currency_override(&upper, ':') {
                return Some(code.to_string());
            }
        }
        request
            .exchange
            .as_ref()
            .map(|exchange| exchange.currency_code().to_string())
    }

    fn get_full_ticker_symbol(
        &self,
        raw_symbol: &str,
        exchange: Option<&Exchange>,
    ) -> Option<String> {
        let ticker = raw_symbol.trim().to_uppercase();
        if ticker.is_empty() {
            return None;
        }
        if ticker.contains(':') {
            let (symbol, _) = split_currency_override(&ticker, ':');
            return Some(symbol.to_string());
        }
        match exchange.and_then(|e| e.provider_suffix(ID)) {
            Some(prefix) => Some(format!("{}:{}", prefix.to_uppercase(), ticker)),
            None => Some(ticker),
        }
    }
}
