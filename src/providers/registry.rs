use anyhow::Result;
use chrono::FixedOffset;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::config::ProvidersConfig;
use crate::providers::Connection;
use crate::providers::google::GoogleConnection;
use crate::providers::yahoo::YahooConnection;

/// Id that explicitly disables a download step.
pub const NO_CONNECTION: &str = "none";

/// Result of looking up the connection configured for a download step.
#[derive(Clone)]
pub enum ConnectionChoice {
    /// No connection is configured, the step is not attempted.
    NotConfigured,
    /// A connection is configured but nothing is registered under its id.
    Unavailable(String),
    Selected(Arc<dyn Connection>),
}

impl ConnectionChoice {
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        match self {
            ConnectionChoice::Selected(connection) => Some(connection),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ConnectionChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionChoice::NotConfigured => write!(f, "NotConfigured"),
            ConnectionChoice::Unavailable(id) => write!(f, "Unavailable({id})"),
            ConnectionChoice::Selected(c) => write!(f, "Selected({})", c.id()),
        }
    }
}

/// Connections available for a run, keyed by their stable id.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every provider that has a configuration section.
    pub fn from_config(
        config: &ProvidersConfig,
        timeout: Duration,
        local_offset: FixedOffset,
    ) -> Result<Self> {
        let mut registry = Self::new();
        if let Some(yahoo) = &config.yahoo {
            registry.register(Arc::new(YahooConnection::new(
                &yahoo.quotes_url,
                &yahoo.history_url,
                timeout,
                local_offset,
            )?));
        }
        if let Some(google) = &config.google {
            registry.register(Arc::new(GoogleConnection::new(
                &google.history_url,
                timeout,
                local_offset,
            )?));
        }
        debug!("Registered connections: {:?}", registry.ids());
        Ok(registry)
    }

    /// Adds a connection, replacing any other registered under the same id.
    pub fn register(&mut self, connection: Arc<dyn Connection>) {
        self.connections
            .insert(connection.id().to_string(), connection);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.connections.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    pub fn select(&self, id: Option<&str>) -> ConnectionChoice {
        let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) else {
            return ConnectionChoice::NotConfigured;
        };
        if id.eq_ignore_ascii_case(NO_CONNECTION) {
            return ConnectionChoice::NotConfigured;
        }
        match self.get(id) {
            Some(connection) => ConnectionChoice::Selected(connection),
            None => ConnectionChoice::Unavailable(id.to_string()),
        }
    }
}
