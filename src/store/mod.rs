//! Reference host model: the instrument table, the symbol map and the
//! on-disk state that carries committed prices from one run to the next.

pub mod disk;
pub mod memory;
pub mod symbols;

pub use disk::StateStore;
pub use memory::{InstrumentState, MemoryInstrumentStore};
pub use symbols::ExchangeSymbolMap;
