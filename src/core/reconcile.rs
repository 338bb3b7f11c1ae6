//! Decides which downloaded price, if any, becomes an instrument's stored price.

use crate::core::market::{Currency, Exchange, Instrument, InstrumentStore, PRICE_DATE_TAG};
use crate::core::quote::{StockHistory, StockRecord};
use crate::providers::{Connection, QuoteRequest};
use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    History,
    Current,
}

/// A downloaded price that may be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    /// Raw price in the provider's price currency.
    pub price: f64,
    pub date_time: DateTime<Utc>,
    pub source: PriceSource,
}

/// Collects the historical and current results for one instrument.
///
/// A usable current price always replaces the historical candidate, even
/// when the history holds a later date.
#[derive(Debug, Default)]
pub struct PriceReconciler {
    candidate: Option<PriceCandidate>,
}

impl PriceReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the most recent valid record of the history as candidate.
    pub fn offer_history(&mut self, history: &StockHistory) -> bool {
        match history.find_most_recent_valid_record() {
            Some(latest) => {
                self.candidate = Some(PriceCandidate {
                    price: latest.close_rate,
                    date_time: latest.date_time,
                    source: PriceSource::History,
                });
                true
            }
            None => false,
        }
    }

    /// Offers a current price whose time is already corrected to local time.
    pub fn offer_current(&mut self, record: &StockRecord, corrected: DateTime<Utc>) -> bool {
        if record.close_rate == 0.0 {
            return false;
        }
        self.candidate = Some(PriceCandidate {
            price: record.close_rate,
            date_time: corrected,
            source: PriceSource::Current,
        });
        true
    }

    pub fn has_candidate(&self) -> bool {
        self.candidate.is_some()
    }

    pub fn candidate(&self) -> Option<&PriceCandidate> {
        self.candidate.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Updated,
    /// The stored price is at least as recent, in epoch milliseconds.
    Stale { stored: i64 },
}

/// Moves an exchange-local quote time to the local system's offset.
///
/// `corrected = raw + (local - exchange)`, so a quote from an exchange at
/// UTC-5 read on a machine at UTC-6 moves back one hour.
pub fn correct_exchange_time(
    raw: DateTime<Utc>,
    exchange: Option<&Exchange>,
    local_offset: FixedOffset,
) -> DateTime<Utc> {
    match exchange {
        Some(exchange) => {
            let corrected = i64::from(local_offset.local_minus_utc())
                .checked_sub(exchange.utc_offset_seconds())
                .and_then(Duration::try_seconds)
                .and_then(|correction| raw.checked_add_signed(correction));
            match corrected {
                Some(corrected) => corrected,
                None => {
                    warn!(
                        "Offset of exchange {} is out of range, keeping time {}",
                        exchange.id, raw
                    );
                    raw
                }
            }
        }
        None => raw,
    }
}

/// Converts a price in `price_currency` into the rate stored by the host.
///
/// The host keeps the reciprocal of the price (units per base unit).
pub fn to_base_rate(price: f64, price_currency: &Currency) -> f64 {
    if price == 0.0 {
        return 0.0;
    }
    price_currency.rate / price
}

/// Epoch milliseconds of the last committed price, 0 when never set.
pub fn stored_price_time(store: &dyn InstrumentStore, id: &str) -> i64 {
    match store.tag(id, PRICE_DATE_TAG) {
        Some(value) => value.trim().parse::<i64>().unwrap_or_else(|e| {
            warn!(
                "Ignoring unparsable {} tag '{}' on {}: {}",
                PRICE_DATE_TAG, value, id, e
            );
            0
        }),
        None => 0,
    }
}

/// Finds the currency a price from `connection` is denominated in.
///
/// Falls back to the instrument's relative-to currency, then to the base.
pub fn resolve_price_currency(
    store: &dyn InstrumentStore,
    instrument: &Instrument,
    connection: Option<&dyn Connection>,
    request: &QuoteRequest,
) -> Currency {
    if let Some(code) = connection.and_then(|c| c.get_price_currency(request)) {
        match store.currency_by_code(&code) {
            Some(currency) => return currency,
            None => debug!(
                "Price currency {} of {} is not in the currency table",
                code, instrument.name
            ),
        }
    }
    store
        .relative_currency(&instrument.id)
        .and_then(|id| store.currency_by_id(&id))
        .unwrap_or_else(|| store.base_currency())
}

/// Writes the candidate if it is strictly newer than the stored price.
pub fn commit_price(
    store: &dyn InstrumentStore,
    instrument_id: &str,
    candidate: &PriceCandidate,
    price_currency: &Currency,
) -> Result<CommitOutcome> {
    let stored = stored_price_time(store, instrument_id);
    let downloaded = candidate.date_time.timestamp_millis();
    if stored >= downloaded {
        return Ok(CommitOutcome::Stale { stored });
    }
    store.set_rate(instrument_id, to_base_rate(candidate.price, price_currency))?;
    store.set_tag(instrument_id, PRICE_DATE_TAG, &downloaded.to_string())?;
    Ok(CommitOutcome::Updated)
}

pub fn price_display_text(
    price_currency: &Currency,
    name: &str,
    price: f64,
    date_time: DateTime<Utc>,
    local_offset: FixedOffset,
) -> String {
    let as_of = date_time.with_timezone(&local_offset).format("%Y-%m-%d");
    format!(
        "{} as of {}: {}",
        name,
        as_of,
        price_currency.format_amount(price)
    )
}

pub fn price_log_text(
    price_currency: &Currency,
    name: &str,
    price: f64,
    date_time: DateTime<Utc>,
    local_offset: FixedOffset,
    updated: bool,
) -> String {
    let local = date_time.with_timezone(&local_offset);
    // Current prices can be intra-day, history only carries the date
    let (label, as_of) = if updated {
        ("Current price", local.format("%Y-%m-%d %-I:%M %p").to_string())
    } else {
        ("Latest historical price", local.format("%Y-%m-%d").to_string())
    };
    format!(
        "{} for {} as of {}: {}",
        label,
        name,
        as_of,
        price_currency.format_amount(price)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::InstrumentKind;
    use crate::store::memory::MemoryInstrumentStore;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn hours(h: i32) -> FixedOffset {
        FixedOffset::east_opt(h * 3600).unwrap()
    }

    fn exchange(offset: f64) -> Exchange {
        Exchange {
            id: "NYSE".to_string(),
            name: "New York Stock Exchange".to_string(),
            utc_offset_hours: offset,
            currency: "USD".to_string(),
            suffixes: BTreeMap::new(),
        }
    }

    fn store() -> MemoryInstrumentStore {
        let store = MemoryInstrumentStore::new("EUR");
        store.insert_currency("EUR", "EUR", "Euro", 2, 1.0);
        store.insert_currency("USD", "USD", "US Dollar", 2, 1.25);
        store.insert_currency("GBP", "GBP", "British Pound", 2, 0.8);
        store.insert_security("aapl", "Apple", Some("AAPL"), Some("USD"));
        store.insert_security("acme", "Acme", Some("ACME"), None);
        store
    }

    fn candidate(price: f64, millis: i64) -> PriceCandidate {
        PriceCandidate {
            price,
            date_time: Utc.timestamp_millis_opt(millis).unwrap(),
            source: PriceSource::Current,
        }
    }

    #[test]
    fn test_exchange_time_correction() {
        let raw = Utc.with_ymd_and_hms(2010, 6, 18, 16, 0, 0).unwrap();
        let corrected = correct_exchange_time(raw, Some(&exchange(-5.0)), hours(-6));
        assert_eq!(corrected, raw - Duration::hours(1));

        // No exchange, no correction
        assert_eq!(correct_exchange_time(raw, None, hours(-6)), raw);

        let corrected = correct_exchange_time(raw, Some(&exchange(5.5)), hours(1));
        assert_eq!(corrected, raw - Duration::minutes(270));
    }

    #[test]
    fn test_out_of_range_exchange_offset_keeps_raw_time() {
        let raw = Utc.with_ymd_and_hms(2010, 6, 18, 16, 0, 0).unwrap();
        assert_eq!(correct_exchange_time(raw, Some(&exchange(1e11)), hours(0)), raw);
        assert_eq!(correct_exchange_time(raw, Some(&exchange(-1e300)), hours(0)), raw);
    }

    #[test]
    fn test_base_rate_is_reciprocal_through_price_currency() {
        let usd = store().currency_by_code("USD").unwrap();
        assert!((to_base_rate(150.0, &usd) - 1.25 / 150.0).abs() < 1e-12);
        assert_eq!(to_base_rate(0.0, &usd), 0.0);

        let eur = store().base_currency();
        assert!((to_base_rate(4.0, &eur) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_current_price_overrides_newer_history() {
        let mut history = StockHistory::new();
        history.add_record(StockRecord::new(
            10.0,
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            "10.0",
        ));
        let current = StockRecord::new(
            11.0,
            Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap(),
            "11.0",
        );

        let mut reconciler = PriceReconciler::new();
        assert!(reconciler.offer_history(&history));
        assert!(reconciler.offer_current(&current, current.date_time));

        let chosen = reconciler.candidate().unwrap();
        assert_eq!(chosen.source, PriceSource::Current);
        assert_eq!(chosen.price, 11.0);
    }

    #[test]
    fn test_zero_current_price_keeps_history_candidate() {
        let mut history = StockHistory::new();
        history.add_record(StockRecord::new(
            10.0,
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
            "10.0",
        ));
        let current = StockRecord::new(0.0, Utc::now(), "N/A");

        let mut reconciler = PriceReconciler::new();
        reconciler.offer_history(&history);
        assert!(!reconciler.offer_current(&current, current.date_time));
        assert_eq!(
            reconciler.candidate().unwrap().source,
            PriceSource::History
        );
    }

    #[test]
    fn test_commit_only_when_strictly_newer() {
        let store = store();
        let usd = store.currency_by_code("USD").unwrap();

        let outcome = commit_price(&store, "aapl", &candidate(125.0, 1_000), &usd).unwrap();
        assert_eq!(outcome, CommitOutcome::Updated);
        assert!((store.rate("aapl").unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(
            store.tag("aapl", PRICE_DATE_TAG).as_deref(),
            Some("1000")
        );

        let before = store.mutation_count();
        let outcome = commit_price(&store, "aapl", &candidate(130.0, 1_000), &usd).unwrap();
        assert_eq!(outcome, CommitOutcome::Stale { stored: 1_000 });
        let outcome = commit_price(&store, "aapl", &candidate(130.0, 999), &usd).unwrap();
        assert_eq!(outcome, CommitOutcome::Stale { stored: 1_000 });
        assert_eq!(store.mutation_count(), before);
        assert!((store.rate("aapl").unwrap() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_unparsable_price_date_counts_as_never_updated() {
        let store = store();
        store.set_tag("aapl", PRICE_DATE_TAG, "yesterday").unwrap();
        assert_eq!(stored_price_time(&store, "aapl"), 0);
        assert_eq!(stored_price_time(&store, "acme"), 0);
    }

    #[test]
    fn test_price_currency_falls_back_to_relative_then_base() {
        let store = store();
        let request = QuoteRequest {
            instrument_id: "aapl".to_string(),
            name: "Apple".to_string(),
            ticker: Some("AAPL".to_string()),
            exchange: None,
        };
        let apple = Instrument {
            id: "aapl".to_string(),
            name: "Apple".to_string(),
            kind: InstrumentKind::Security,
            ticker: Some("AAPL".to_string()),
            currency_code: None,
        };
        assert_eq!(
            resolve_price_currency(&store, &apple, None, &request).code,
            "USD"
        );

        let acme = Instrument {
            id: "acme".to_string(),
            name: "Acme".to_string(),
            ..apple
        };
        assert_eq!(
            resolve_price_currency(&store, &acme, None, &request).code,
            "EUR"
        );
    }

    #[test]
    fn test_display_and_log_text() {
        let usd = store().currency_by_code("USD").unwrap();
        let at = Utc.with_ymd_and_hms(2010, 6, 18, 21, 0, 0).unwrap();
        assert_eq!(
            price_display_text(&usd, "Apple", 152.3, at, hours(-5)),
            "Apple as of 2010-06-18: 152.30 USD"
        );
        assert_eq!(
            price_log_text(&usd, "Apple", 152.3, at, hours(-5), true),
            "Current price for Apple as of 2010-06-18 4:00 PM: 152.30 USD"
        );
        assert_eq!(
            price_log_text(&usd, "Apple", 152.3, at, hours(-5), false),
            "Latest historical price for Apple as of 2010-06-18: 152.30 USD"
        );
    }
}
