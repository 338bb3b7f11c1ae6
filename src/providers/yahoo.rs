use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::{DateRange, DownloadError, Exchange, FetchOutcome, StockHistory, StockRecord};
use crate::providers::util::{
    HistoryFormat, build_client, csv_reader, fetch_text, local_to_utc, parse_history_csv,
    parse_rate, split_currency_override,
};
use crate::providers::{Connection, QuoteRequest};

pub const ID: &str = "yahoo";

const HISTORY_FORMAT: HistoryFormat = HistoryFormat {
    // Date,Open,High,Low,Close,Volume,Adj Close
    date_format: "%Y-%m-%d",
    close_index: 4,
};

// YahooConnection implementation for current prices and daily history
pub struct YahooConnection {
    quotes_url: String,
    history_url: String,
    client: Client,
    local_offset: FixedOffset,
}

impl YahooConnection {
    pub fn new(
        quotes_url: &str,
        history_url: &str,
        timeout: Duration,
        local_offset: FixedOffset,
    ) -> Result<Self> {
        Ok(YahooConnection {
            quotes_url: quotes_url.to_string(),
            history_url: history_url.to_string(),
            client: build_client(timeout)?,
            local_offset,
        })
    }

    fn symbol_for(&self, request: &QuoteRequest) -> Result<String, DownloadError> {
        request
            .ticker
            .as_deref()
            .and_then(|t| self.get_full_ticker_symbol(t, request.exchange.as_ref()))
            .ok_or_else(|| DownloadError::MissingSymbol {
                instrument: request.name.clone(),
            })
    }

    pub fn current_price_url(&self, symbol: &str) -> String {
        format!(
            "{}?s={}&f=sl1d1t1c1ohgv&e=.csv",
            self.quotes_url,
            urlencoding::encode(symbol)
        )
    }

    /// Months are zero-based in this API.
    pub fn history_url(&self, symbol: &str, range: &DateRange) -> String {
        let start = range.start();
        let end = range.end();
        format!(
            "{}?s={}&a={}&b={}&c={}&d={}&e={}&f={}&g=d&ignore=.csv",
            self.history_url,
            urlencoding::encode(symbol),
            start.month0(),
            start.day(),
            start.year(),
            end.month0(),
            end.day(),
            end.year()
        )
    }

    /// Quote times come as exchange wall clock, e.g. "6/18/2010" "4:00pm".
    fn parse_quote_time(&self, date: &str, time: &str) -> Option<DateTime<Utc>> {
        let date = NaiveDate::parse_from_str(date.trim(), "%m/%d/%Y").ok()?;
        let time = NaiveTime::parse_from_str(&time.trim().to_uppercase(), "%I:%M%p").ok()?;
        Some(local_to_utc(date.and_time(time), self.local_offset))
    }

    fn parse_current_price(
        &self,
        body: &str,
        request: &QuoteRequest,
    ) -> Result<FetchOutcome<StockRecord>, DownloadError> {
        // "SYM",price,"date","time",change,open,high,low,volume
        let row = csv_reader(body)
            .records()
            .filter_map(Result::ok)
            .find(|row| row.iter().any(|field| !field.is_empty()));
        let Some(row) = row else {
            return Ok(FetchOutcome::Empty);
        };
        if row.len() < 4 {
            return Err(DownloadError::parse(
                &request.name,
                format!("expected at least 4 fields in '{}'", body.trim()),
            ));
        }

        let price_field = row.get(1).unwrap_or_default();
        let price = parse_rate(price_field).unwrap_or(0.0);
        let date_time = match self.parse_quote_time(
            row.get(2).unwrap_or_default(),
            row.get(3).unwrap_or_default(),
        ) {
            Some(date_time) => date_time,
            // A missing price is reported as a zero rate, its time does not matter
            None if price == 0.0 => Utc::now(),
            None => {
                return Err(DownloadError::parse(
                    &request.name,
                    format!(
                        "invalid quote time '{} {}'",
                        row.get(2).unwrap_or_default(),
                        row.get(3).unwrap_or_default()
                    ),
                ));
            }
        };

        Ok(FetchOutcome::Data(StockRecord::new(
            price,
            date_time,
            price_field,
        )))
    }
}

#[async_trait]
impl Connection for YahooConnection {
    fn id(&self) -> &'static str {
        ID
    }

    fn display_name(&self) -> &str {
        "Yahoo Finance"
    }

    fn can_get_history(&self) -> bool {
        true
    }

    fn can_get_current_price(&self) -> bool {
        true
    }

    #[instrument(
        name = "YahooHistoryFetch",
        skip(self, request, range),
        fields(instrument = %request.name)
    )]
    async fn get_history(
        &self,
        request: &QuoteRequest,
        range: &DateRange,
        full_history: bool,
    ) -> Result<FetchOutcome<StockHistory>, DownloadError> {
        let symbol = self.symbol_for(request)?;
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

    #[instrument(
        name = "YahooQuoteFetch",
        skip(self, request),
        fields(instrument = %request.name)
    )]
    async fn get_current_price(
        &self,
        request: &QuoteRequest,
        auto_save_as_history: bool,
    ) -> Result<FetchOutcome<StockRecord>, DownloadError> {
        let symbol = self.symbol_for(request)?;
        let url = self.current_price_url(&symbol);
        debug!(auto_save_as_history, "Requesting current price of {}", symbol);

        match fetch_text(&self.client, &url, &request.name).await? {
            Some(body) => self.parse_current_price(&body, request),
            None => Ok(FetchOutcome::Empty),
        }
    }

    fn get_price_currency(&self, request: &QuoteRequest) -> Option<String> {
        if let Some(ticker) = request.ticker.as_deref() {
            let upper = ticker.trim().to_uppercase();
            if let (_, Some(code)) = split_currency_override(&upper, '.') {
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
        // A suffix typed by the user overrides the exchange's
        if ticker.contains('.') {
            let (symbol, _) = split_currency_override(&ticker, '.');
            return Some(symbol.to_string());
        }
        match exchange.and_then(|e| e.provider_suffix(ID)) {
            Some(suffix) => Some(format!("{ticker}{suffix}")),
            None => Some(ticker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lse() -> Exchange {
        Exchange {
            id: "LSE".to_string(),
            name: "London Stock Exchange".to_string(),
            utc_offset_hours: 0.0,
            currency: "GBP".to_string(),
            suffixes: BTreeMap::from([("yahoo".to_string(), ".L".to_string())]),
        }
    }

    fn request(ticker: &str, exchange: Option<Exchange>) -> QuoteRequest {
        QuoteRequest {
            instrument_id: "id".to_string(),
            name: "Test Security".to_string(),
            ticker: Some(ticker.to_string()),
            exchange,
        }
    }

    fn connection(server: &MockServer) -> YahooConnection {
        YahooConnection::new(
            &format!("{}/d/quotes.csv", server.uri()),
            &format!("{}/table.csv", server.uri()),
            Duration::from_secs(5),
            FixedOffset::west_opt(5 * 3600).unwrap(),
        )
        .unwrap()
    }

    async fn mount_quote(server: &MockServer, symbol: &str, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/d/quotes.csv"))
            .and(query_param("s", symbol))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_successful_current_price_fetch() {
        let server = MockServer::start().await;
        mount_quote(
            &server,
            "VOD.L",
            200,
            "\"VOD.L\",152.30,\"6/18/2010\",\"4:00pm\",+1.20,151.00,153.00,150.50,1000\r\n",
        )
        .await;

        let provider = connection(&server);
        let outcome = provider
            .get_current_price(&request("vod", Some(lse())), false)
            .await
            .unwrap();
        let FetchOutcome::Data(record) = outcome else {
            panic!("expected a quote");
        };
        assert_eq!(record.close_rate, 152.3);
        assert_eq!(record.price_display, "152.30");
        // 4pm wall clock read at UTC-5
        assert_eq!(
            record.date_time,
            Utc.with_ymd_and_hms(2010, 6, 18, 21, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_symbol_gives_zero_rate() {
        let server = MockServer::start().await;
        mount_quote(&server, "NOPE", 200, "\"NOPE\",N/A,\"N/A\",\"N/A\",N/A,N/A,N/A,N/A,N/A\n").await;

        let provider = connection(&server);
        let record = provider
            .get_current_price(&request("nope", None), true)
            .await
            .unwrap()
            .into_option()
            .unwrap();
        assert_eq!(record.close_rate, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_quote_time_is_parse_error() {
        let server = MockServer::start().await;
        mount_quote(&server, "AAPL", 200, "\"AAPL\",150.0,\"yesterday\",\"4:00pm\"\n").await;

        let provider = connection(&server);
        let err = provider
            .get_current_price(&request("AAPL", None), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
        assert!(err.to_string().contains("invalid quote time"));
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_outcome() {
        let server = MockServer::start().await;
        mount_quote(&server, "AAPL", 200, "  \n").await;

        let provider = connection(&server);
        let outcome = provider
            .get_current_price(&request("AAPL", None), false)
            .await
            .unwrap();
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        mount_quote(&server, "AAPL", 500, "").await;

        let provider = connection(&server);
        let err = provider
            .get_current_price(&request("AAPL", None), false)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "HTTP error: 500 Internal Server Error for Test Security"
        );
    }

    #[tokio::test]
    async fn test_history_fetch() {
        let server = MockServer::start().await;
        let body = "Date,Open,High,Low,Close,Volume,Adj Close\n\
                    2010-06-18,150,153,149,152.30,1000,152.30\n\
                    2010-06-17,149,151,148,150.10,1000,150.10\n\
                    2010-06-16,149,151,148,,1000,150.10\n";
        Mock::given(method("GET"))
            .and(path("/table.csv"))
            .and(query_param("s", "VOD.L"))
            .and(query_param("a", "5"))
            .and(query_param("b", "1"))
            .and(query_param("c", "2010"))
            .and(query_param("e", "19"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let provider = connection(&server);
        let range = DateRange::new(NaiveDate::from_ymd_opt(2010, 6, 19).unwrap(), 18);
        let history = provider
            .get_history(&request("VOD", Some(lse())), &range, true)
            .await
            .unwrap()
            .into_option()
            .unwrap();
        assert_eq!(history.record_count(), 2);
        assert_eq!(history.error_count(), 1);
        assert_eq!(
            history.find_most_recent_valid_record().unwrap().close_rate,
            152.3
        );
    }

    #[tokio::test]
    async fn test_missing_ticker() {
        let server = MockServer::start().await;
        let provider = connection(&server);
        let mut req = request("", None);
        req.ticker = None;
        let err = provider.get_current_price(&req, false).await.unwrap_err();
        assert!(matches!(err, DownloadError::MissingSymbol { .. }));
    }

    #[test]
    fn test_full_ticker_symbol() {
        let provider = YahooConnection::new(
            "http://localhost/q",
            "http://localhost/h",
            Duration::from_secs(1),
            FixedOffset::east_opt(0).unwrap(),
        )
        .unwrap();
        let lse = lse();
        assert_eq!(provider.get_full_ticker_symbol("  ", Some(&lse)), None);
        assert_eq!(
            provider.get_full_ticker_symbol(" vod ", Some(&lse)).as_deref(),
            Some("VOD.L")
        );
        assert_eq!(
            provider.get_full_ticker_symbol("vod.ax", Some(&lse)).as_deref(),
            Some("VOD.AX")
        );
        assert_eq!(
            provider.get_full_ticker_symbol("vod.l-usd", Some(&lse)).as_deref(),
            Some("VOD.L")
        );
        assert_eq!(
            provider.get_full_ticker_symbol("aapl", None).as_deref(),
            Some("AAPL")
        );
    }

    #[test]
    fn test_price_currency() {
        let provider = YahooConnection::new(
            "http://localhost/q",
            "http://localhost/h",
            Duration::from_secs(1),
            FixedOffset::east_opt(0).unwrap(),
        )
        .unwrap();
        assert_eq!(
            provider.get_price_currency(&request("VOD", Some(lse()))).as_deref(),
            Some("GBP")
        );
        assert_eq!(
            provider
                .get_price_currency(&request("VOD.L-usd", Some(lse())))
                .as_deref(),
            Some("USD")
        );
        assert_eq!(provider.get_price_currency(&request("AAPL", None)), None);
    }

    #[test]
    fn test_history_url() {
        let provider = YahooConnection::new(
            "http://localhost/q",
            "http://localhost/table.csv",
            Duration::from_secs(1),
            FixedOffset::east_opt(0).unwrap(),
        )
        .unwrap();
        let range = DateRange::new(NaiveDate::from_ymd_opt(2010, 6, 19).unwrap(), 18);
        assert_eq!(
            provider.history_url("VOD.L", &range),
            "http://localhost/table.csv?s=VOD.L&a=5&b=1&c=2010&d=5&e=19&f=2010&g=d&ignore=.csv"
        );
    }
}
