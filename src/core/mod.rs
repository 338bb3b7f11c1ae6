//! Core business logic abstractions

pub mod config;
pub mod error;
pub mod log;
pub mod market;
pub mod quote;
pub mod reconcile;

// Re-export main types for cleaner imports
pub use error::DownloadError;
pub use market::{
    Currency, Exchange, Instrument, InstrumentKind, InstrumentStore, ProgressSink, SymbolMap,
};
pub use quote::{DateRange, DownloadResult, ExchangeRate, FetchOutcome, StockHistory, StockRecord};
