use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::config::FxProviderConfig;
use crate::core::{DownloadError, ExchangeRate, FetchOutcome};
use crate::providers::RateConnection;
use crate::providers::util::{build_client, csv_reader, fetch_text, parse_rate};

pub const ID: &str = "fx";

/// Currency rates from Yahoo's quote CSV, using `BASECUR=X` pair symbols.
pub struct FxConnection {
    quotes_url: String,
    client: Client,
}

impl FxConnection {
    pub fn new(quotes_url: &str, timeout: Duration) -> Result<Self> {
        Ok(FxConnection {
            quotes_url: quotes_url.to_string(),
            client: build_client(timeout)?,
        })
    }

    pub fn from_config(config: &FxProviderConfig, timeout: Duration) -> Result<Self> {
        Self::new(&config.quotes_url, timeout)
    }

    pub fn rate_url(&self, currency: &str, base_currency: &str) -> String {
        format!(
            "{}?s={}=X&f=sl1d1t1c1ohgv&e=.csv",
            self.quotes_url,
            urlencoding::encode(&format!("{base_currency}{currency}"))
        )
    }
}

fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim().to_uppercase();
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

#[async_trait]
impl RateConnection for FxConnection {
    fn id(&self) -> &'static str {
        ID
    }

    #[instrument(name = "FxRateFetch", skip(self))]
    async fn get_current_rate(
        &self,
        currency: &str,
        base_currency: &str,
    ) -> Result<FetchOutcome<ExchangeRate>, DownloadError> {
        let (Some(currency), Some(base)) = (normalize_code(currency), normalize_code(base_currency))
        else {
            debug!("Not a pair of ISO currency codes, nothing to fetch");
            return Ok(FetchOutcome::Empty);
        };

        let url = self.rate_url(&currency, &base);
        let Some(body) = fetch_text(&self.client, &url, &currency).await? else {
            return Ok(FetchOutcome::Empty);
        };

        // The last line carrying a rate wins
        let rate = csv_reader(&body)
            .records()
            .filter_map(Result::ok)
            .filter_map(|row| row.get(1).and_then(parse_rate))
            .last()
            .ok_or_else(|| {
                DownloadError::parse(&currency, format!("no rate in '{}'", body.trim()))
            })?;

        Ok(FetchOutcome::Data(ExchangeRate { currency, rate }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection(server: &MockServer) -> FxConnection {
        FxConnection::new(&format!("{}/d/quotes.csv", server.uri()), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_rate_url() {
        let fx = FxConnection::new("http://localhost/d/quotes.csv", Duration::from_secs(1)).unwrap();
        assert_eq!(
            fx.rate_url("USD", "EUR"),
            "http://localhost/d/quotes.csv?s=EURUSD=X&f=sl1d1t1c1ohgv&e=.csv"
        );
    }

    #[tokio::test]
    async fn test_fetch_rate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/d/quotes.csv"))
            .and(query_param("s", "EURUSD=X"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "\"EURUSD=X\",1.0842,\"3/8/2024\",\"4:15pm\",N/A,N/A,N/A,N/A,0\r\n",
            ))
            .mount(&server)
            .await;

        let rate = connection(&server)
            .get_current_rate(" usd", "eur ")
            .await
            .unwrap()
            .into_option()
            .unwrap();
        assert_eq!(rate.currency, "USD");
        assert_eq!(rate.rate, 1.0842);
    }

    #[tokio::test]
    async fn test_invalid_codes_make_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = connection(&server);
        assert!(fx.get_current_rate("DOLLAR", "EUR").await.unwrap().is_empty());
        assert!(fx.get_current_rate("USD", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_rate_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"EURXXX=X\",N/A,N/A\n"))
            .mount(&server)
            .await;

        let err = connection(&server)
            .get_current_rate("XXX", "EUR")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
        assert_eq!(err.instrument(), "XXX");
    }
}
