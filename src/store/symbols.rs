use crate::core::config::AppConfig;
use crate::core::market::{Exchange, Instrument, InstrumentKind, SymbolMap};
use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};

const MAX_UTC_OFFSET_HOURS: f64 = 14.0;

/// Tracking flags and exchange assignments taken from the config file.
#[derive(Debug, Default, Clone)]
pub struct ExchangeSymbolMap {
    tracked: BTreeSet<String>,
    exchanges: BTreeMap<String, Exchange>,
}

impl ExchangeSymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Securities are only tracked when they have a ticker to look up.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        for exchange in &config.exchanges {
            let hours = exchange.utc_offset_hours();
            if !hours.is_finite() || hours.abs() > MAX_UTC_OFFSET_HOURS {
                bail!(
                    "Exchange '{}' has invalid UTC offset of {} hours",
                    exchange.id,
                    hours
                );
            }
        }

        let known: BTreeMap<&str, &Exchange> = config
            .exchanges
            .iter()
            .map(|exchange| (exchange.id.as_str(), exchange))
            .collect();

        let mut map = Self::new();
        for item in &config.instruments {
            if let Some(exchange_id) = &item.exchange {
                let Some(exchange) = known.get(exchange_id.as_str()) else {
                    bail!(
                        "Instrument '{}' refers to unknown exchange '{}'",
                        item.id,
                        exchange_id
                    );
                };
                map.assign_exchange(&item.id, (*exchange).clone());
            }

            let has_ticker = item
                .ticker
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty());
            if item.tracked && (item.kind == InstrumentKind::Currency || has_ticker) {
                map.track(&item.id);
            }
        }
        Ok(map)
    }

    pub fn track(&mut self, id: &str) -> &mut Self {
        self.tracked.insert(id.to_string());
        self
    }

    pub fn assign_exchange(&mut self, id: &str, exchange: Exchange) -> &mut Self {
        self.exchanges.insert(id.to_string(), exchange);
        self
    }
}

impl SymbolMap for ExchangeSymbolMap {
    fn is_tracked(&self, instrument: &Instrument) -> bool {
        self.tracked.contains(&instrument.id)
    }

    fn exchange_for(&self, instrument: &Instrument) -> Option<Exchange> {
        self.exchanges.get(&instrument.id).cloned()
    }
}
