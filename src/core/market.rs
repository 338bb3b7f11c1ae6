//! Narrow interfaces into the host's accounting model.
//!
//! The host owns the currency table, the symbol map and whatever shows
//! progress to the user. The download code only reads instruments and
//! writes rates and tags back through these traits.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag holding the time of the last committed price, in epoch milliseconds.
pub const PRICE_DATE_TAG: &str = "price_date";

/// Tag holding the id of the currency a security is priced relative to.
pub const RELATIVE_TO_TAG: &str = "rel_curr_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Currency,
    Security,
}

/// An entry of the host's currency table.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub id: String,
    pub name: String,
    pub kind: InstrumentKind,
    pub ticker: Option<String>,
    /// ISO code, only meaningful for currencies.
    pub currency_code: Option<String>,
}

/// A currency as seen by price conversion.
///
/// `rate` is the number of units of this currency per unit of the base
/// currency, so the base currency always has a rate of 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Currency {
    pub id: String,
    pub code: String,
    pub name: String,
    pub decimal_places: u32,
    pub rate: f64,
}

impl Currency {
    /// Formats an amount in this currency, e.g. `152.30 USD`.
    pub fn format_amount(&self, amount: f64) -> String {
        format!(
            "{:.*} {}",
            self.decimal_places as usize, amount, self.code
        )
    }
}

/// A stock exchange and how each provider spells its symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub utc_offset_hours: f64,
    pub currency: String,
    /// Provider id to ticker suffix (Yahoo) or prefix (Google).
    #[serde(default)]
    pub suffixes: BTreeMap<String, String>,
}

impl Exchange {
    pub fn utc_offset_hours(&self) -> f64 {
        self.utc_offset_hours
    }

    pub fn utc_offset_seconds(&self) -> i64 {
        (self.utc_offset_hours * 3600.0).round() as i64
    }

    pub fn provider_suffix(&self, provider_id: &str) -> Option<&str> {
        self.suffixes
            .get(provider_id)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn currency_code(&self) -> &str {
        &self.currency
    }
}

/// Read/write access to the host's instrument table.
///
/// Writes are fallible: a failing write is an unexpected condition that ends
/// the whole run.
pub trait InstrumentStore: Send + Sync {
    fn instruments(&self) -> Vec<Instrument>;

    fn tag(&self, id: &str, key: &str) -> Option<String>;

    fn set_tag(&self, id: &str, key: &str, value: &str) -> Result<()>;

    fn set_rate(&self, id: &str, rate: f64) -> Result<()>;

    fn relative_currency(&self, id: &str) -> Option<String> {
        self.tag(id, RELATIVE_TO_TAG)
    }

    fn currency_by_id(&self, id: &str) -> Option<Currency>;

    fn currency_by_code(&self, code: &str) -> Option<Currency>;

    fn base_currency(&self) -> Currency;

    /// Records a dated price in the instrument's history, in base terms.
    fn add_price_snapshot(&self, id: &str, date: NaiveDate, rate: f64) -> Result<()>;

    fn fire_change_notification(&self);
}

/// Which instruments the user wants downloaded, and where they trade.
pub trait SymbolMap: Send + Sync {
    fn is_tracked(&self, instrument: &Instrument) -> bool;

    fn exchange_for(&self, instrument: &Instrument) -> Option<Exchange>;
}

/// Fire-and-forget progress channel.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: f32, message: &str);
}
