use crate::core::{DateRange, DownloadError, StockHistory, StockRecord};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "quotesync/1.0";

pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// GETs `url` and returns its body, or `None` when the body is blank.
pub async fn fetch_text(
    client: &Client,
    url: &str,
    instrument: &str,
) -> Result<Option<String>, DownloadError> {
    debug!("Requesting {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DownloadError::from_request(instrument, e))?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            instrument: instrument.to_string(),
            status: response.status(),
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| DownloadError::from_request(instrument, e))?;
    if text.trim().is_empty() {
        debug!("Received empty response for {}", instrument);
        return Ok(None);
    }
    Ok(Some(text))
}

/// Parses a numeric CSV field; "N/A" and blanks yield `None`.
pub fn parse_rate(field: &str) -> Option<f64> {
    let value = field.trim().trim_matches('"').trim();
    if value.is_empty() || value.eq_ignore_ascii_case("N/A") {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn csv_reader(body: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes())
}

/// Interprets a wall-clock time at `offset`.
pub fn local_to_utc(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Column layout of a provider's daily history CSV.
#[derive(Debug, Clone, Copy)]
pub struct HistoryFormat {
    pub date_format: &'static str,
    pub close_index: usize,
}

/// Turns a daily history CSV into records, oldest first.
///
/// The first line is treated as a header when its date does not parse.
/// Any other line without a parsable date or close price is counted as an
/// error and skipped.
pub fn parse_history_csv(
    body: &str,
    format: HistoryFormat,
    range: &DateRange,
    full_history: bool,
    local_offset: FixedOffset,
) -> StockHistory {
    let mut history = StockHistory::new();

    for (line, row) in csv_reader(body).records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!("Skipping unreadable history line {}: {}", line + 1, e);
                history.add_error();
                continue;
            }
        };
        if row.iter().all(|field| field.is_empty()) {
            continue;
        }

        let date_field = row.get(0).unwrap_or_default().trim_start_matches('\u{feff}');
        let date = match NaiveDate::parse_from_str(date_field, format.date_format) {
            Ok(date) => date,
            // A header row names its columns, it carries no digits
            Err(_) if line == 0 && !date_field.chars().any(|c| c.is_ascii_digit()) => continue,
            Err(e) => {
                debug!("Skipping history line {} with date '{}': {}", line + 1, date_field, e);
                history.add_error();
                continue;
            }
        };

        let close_field = row.get(format.close_index).unwrap_or_default();
        let Some(close) = parse_rate(close_field) else {
            debug!("Skipping history line {} with close '{}'", line + 1, close_field);
            history.add_error();
            continue;
        };

        if !full_history && !range.contains(date) {
            continue;
        }

        let date_time = local_to_utc(date.and_time(NaiveTime::MIN), local_offset);
        history.add_record(StockRecord::new(close, date_time, close_field));
    }

    history.sort_by_date();
    history
}

/// Splits a `-CUR` currency override that follows the last `marker`.
///
/// `("LON:VOD-GBP", ':')` gives `("LON:VOD", Some("GBP"))`.
pub fn split_currency_override(symbol: &str, marker: char) -> (&str, Option<&str>) {
    if let Some(marker_idx) = symbol.rfind(marker) {
        if let Some(dash) = symbol[marker_idx..].find('-') {
            let (head, tail) = symbol.split_at(marker_idx + dash);
            let code = tail[1..].split('-').next().unwrap_or_default().trim();
            return (head, (!code.is_empty()).then_some(code));
        }
    }
    (symbol, None)
}
