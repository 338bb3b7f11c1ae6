use crate::core::config::AppConfig;
use crate::core::market::{
    Currency, Instrument, InstrumentKind, InstrumentStore, RELATIVE_TO_TAG,
};
use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// The mutable part of an instrument, as persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentState {
    pub rate: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub snapshots: BTreeMap<NaiveDate, f64>,
}

#[derive(Debug, Clone)]
struct Entry {
    instrument: Instrument,
    decimal_places: u32,
    state: InstrumentState,
}

impl Entry {
    fn as_currency(&self) -> Option<Currency> {
        if self.instrument.kind != InstrumentKind::Currency {
            return None;
        }
        Some(Currency {
            id: self.instrument.id.clone(),
            code: self
                .instrument
                .currency_code
                .clone()
                .unwrap_or_else(|| self.instrument.id.clone()),
            name: self.instrument.name.clone(),
            decimal_places: self.decimal_places,
            rate: self.state.rate,
        })
    }
}

/// Reference instrument table kept in memory, in insertion order.
///
/// Only writes that change something are counted as mutations, so a
/// repeated run over the same data can be checked for being a no-op.
#[derive(Debug)]
pub struct MemoryInstrumentStore {
    base_currency_id: String,
    entries: RwLock<Vec<Entry>>,
    mutations: AtomicUsize,
    notifications: AtomicUsize,
}

impl MemoryInstrumentStore {
    pub fn new(base_currency_id: &str) -> Self {
        Self {
            base_currency_id: base_currency_id.to_string(),
            entries: RwLock::new(Vec::new()),
            mutations: AtomicUsize::new(0),
            notifications: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = Self::new(&config.base_currency);

        for item in &config.instruments {
            if store.contains(&item.id) {
                bail!("Duplicate instrument id '{}' in config", item.id);
            }
            match item.kind {
                InstrumentKind::Currency => {
                    let rate = if item.id == config.base_currency {
                        1.0
                    } else {
                        item.rate.unwrap_or(1.0)
                    };
                    store.insert_currency(
                        &item.id,
                        item.code.as_deref().unwrap_or(&item.id),
                        &item.name,
                        item.decimal_places.unwrap_or(2),
                        rate,
                    );
                }
                InstrumentKind::Security => {
                    store.insert_security(
                        &item.id,
                        &item.name,
                        item.ticker.as_deref(),
                        item.relative_to.as_deref(),
                    );
                    if let Some(rate) = item.rate {
                        store.write_entry(&item.id, |entry| entry.state.rate = rate);
                    }
                }
            }
        }

        if store.currency_by_id(&config.base_currency).is_none() {
            bail!(
                "Base currency '{}' is not configured as a currency",
                config.base_currency
            );
        }
        for item in &config.instruments {
            if let Some(relative_to) = &item.relative_to {
                store.currency_by_id(relative_to).with_context(|| {
                    format!(
                        "Instrument '{}' is relative to unknown currency '{}'",
                        item.id, relative_to
                    )
                })?;
            }
        }

        debug!("Loaded {} instruments from config", config.instruments.len());
        Ok(store)
    }

    pub fn insert_currency(&self, id: &str, code: &str, name: &str, decimals: u32, rate: f64) {
        self.push(Entry {
            instrument: Instrument {
                id: id.to_string(),
                name: name.to_string(),
                kind: InstrumentKind::Currency,
                ticker: None,
                currency_code: Some(code.trim().to_uppercase()),
            },
            decimal_places: decimals,
            state: InstrumentState {
                rate,
                ..InstrumentState::default()
            },
        });
    }

    pub fn insert_security(
        &self,
        id: &str,
        name: &str,
        ticker: Option<&str>,
        relative_to: Option<&str>,
    ) {
        let mut state = InstrumentState::default();
        if let Some(relative_to) = relative_to {
            state
                .tags
                .insert(RELATIVE_TO_TAG.to_string(), relative_to.to_string());
        }
        self.push(Entry {
            instrument: Instrument {
                id: id.to_string(),
                name: name.to_string(),
                kind: InstrumentKind::Security,
                ticker: ticker.map(str::to_string),
                currency_code: None,
            },
            decimal_places: 4,
            state,
        });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().iter().any(|e| e.instrument.id == id)
    }

    pub fn rate(&self, id: &str) -> Option<f64> {
        self.read()
            .iter()
            .find(|e| e.instrument.id == id)
            .map(|e| e.state.rate)
    }

    pub fn snapshots(&self, id: &str) -> Vec<(NaiveDate, f64)> {
        self.read()
            .iter()
            .find(|e| e.instrument.id == id)
            .map(|e| e.state.snapshots.iter().map(|(d, r)| (*d, *r)).collect())
            .unwrap_or_default()
    }

    pub fn states(&self) -> BTreeMap<String, InstrumentState> {
        self.read()
            .iter()
            .map(|e| (e.instrument.id.clone(), e.state.clone()))
            .collect()
    }

    /// Puts back a persisted state. Unknown ids are ignored.
    pub fn restore_state(&self, id: &str, state: InstrumentState) -> bool {
        let base = id == self.base_currency_id;
        self.write_entry(id, |entry| {
            let mut state = state;
            if base {
                state.rate = 1.0;
            }
            // Configuration wins over stale persisted tags
            if let Some(relative_to) = entry.state.tags.get(RELATIVE_TO_TAG) {
                state
                    .tags
                    .insert(RELATIVE_TO_TAG.to_string(), relative_to.clone());
            }
            entry.state = state;
        })
        .is_some()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }

    fn push(&self, entry: Entry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entry<T>(&self, id: &str, f: impl FnOnce(&mut Entry) -> T) -> Option<T> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.iter_mut().find(|e| e.instrument.id == id).map(f)
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut InstrumentState) -> bool) -> Result<()> {
        let changed = self
            .write_entry(id, |entry| f(&mut entry.state))
            .ok_or_else(|| anyhow!("Unknown instrument '{}'", id))?;
        if changed {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl InstrumentStore for MemoryInstrumentStore {
    fn instruments(&self) -> Vec<Instrument> {
        self.read().iter().map(|e| e.instrument.clone()).collect()
    }

    fn tag(&self, id: &str, key: &str) -> Option<String> {
        self.read()
            .iter()
            .find(|e| e.instrument.id == id)
            .and_then(|e| e.state.tags.get(key).cloned())
    }

    fn set_tag(&self, id: &str, key: &str, value: &str) -> Result<()> {
        self.mutate(id, |state| {
            if state.tags.get(key).map(String::as_str) == Some(value) {
                return false;
            }
            state.tags.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn set_rate(&self, id: &str, rate: f64) -> Result<()> {
        if !rate.is_finite() {
            bail!("Refusing to store non-finite rate {} for '{}'", rate, id);
        }
        self.mutate(id, |state| {
            if state.rate == rate {
                return false;
            }
            state.rate = rate;
            true
        })
    }

    fn currency_by_id(&self, id: &str) -> Option<Currency> {
        self.read()
            .iter()
            .find(|e| e.instrument.id == id)
            .and_then(Entry::as_currency)
    }

    fn currency_by_code(&self, code: &str) -> Option<Currency> {
        let code = code.trim();
        self.read()
            .iter()
            .filter_map(Entry::as_currency)
            .find(|c| c.code.eq_ignore_ascii_case(code))
    }

    fn base_currency(&self) -> Currency {
        self.currency_by_id(&self.base_currency_id)
            .unwrap_or_else(|| Currency {
                id: self.base_currency_id.clone(),
                code: self.base_currency_id.to_uppercase(),
                name: self.base_currency_id.clone(),
                decimal_places: 2,
                rate: 1.0,
            })
    }

    fn add_price_snapshot(&self, id: &str, date: NaiveDate, rate: f64) -> Result<()> {
        self.mutate(id, |state| {
            if state.snapshots.get(&date) == Some(&rate) {
                return false;
            }
            state.snapshots.insert(date, rate);
            true
        })
    }

    fn fire_change_notification(&self) {
        self.notifications.fetch_add(1, Ordering::SeqCst);
    }
}
