use crate::store::memory::{InstrumentState, MemoryInstrumentStore};
use anyhow::{Context, Result};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

const PARTITION: &str = "instruments";

/// Instrument states persisted between runs, one JSON value per instrument id.
pub struct StateStore {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path.join("state"))
            .open()
            .with_context(|| format!("Failed to open state store in {}", path.display()))?;
        let partition = keyspace
            .open_partition(PARTITION, PartitionCreateOptions::default())
            .context("Failed to open instruments partition")?;
        Ok(Self {
            keyspace,
            partition,
        })
    }

    pub fn load(&self) -> Result<BTreeMap<String, InstrumentState>> {
        let mut states = BTreeMap::new();
        for item in self.partition.iter() {
            let (key, value) = item.context("Failed to read state store")?;
            let id = String::from_utf8_lossy(&key).into_owned();
            match serde_json::from_slice::<InstrumentState>(&value) {
                Ok(state) => {
                    states.insert(id, state);
                }
                Err(e) => warn!("Ignoring unreadable state of '{}': {}", id, e),
            }
        }
        Ok(states)
    }

    pub fn save(&self, states: &BTreeMap<String, InstrumentState>) -> Result<()> {
        for (id, state) in states {
            self.partition
                .insert(id.as_str(), serde_json::to_vec(state)?)
                .with_context(|| format!("Failed to save state of '{id}'"))?;
        }
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to flush state store")?;
        debug!("Saved {} instrument states", states.len());
        Ok(())
    }

    /// Loads persisted states into `store`, returning how many matched.
    pub fn restore_into(&self, store: &MemoryInstrumentStore) -> Result<usize> {
        let mut restored = 0;
        for (id, state) in self.load()? {
            if store.restore_state(&id, state) {
                restored += 1;
            } else {
                debug!("Skipping state of '{}' which is no longer configured", id);
            }
        }
        Ok(restored)
    }

    pub fn save_from(&self, store: &MemoryInstrumentStore) -> Result<()> {
        self.save(&store.states())
    }
}
