use crate::core::market::{Exchange, InstrumentKind};
use anyhow::{Context, Result};
use chrono::{FixedOffset, Local, Offset};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstrumentConfig {
    pub id: String,
    pub name: String,
    pub kind: InstrumentKind,
    #[serde(default)]
    pub ticker: Option<String>,
    /// ISO code of a currency, defaults to the id.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub relative_to: Option<String>,
    #[serde(default = "default_true")]
    pub tracked: bool,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub decimal_places: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    pub history: bool,
    pub current_price: bool,
    pub history_connection: Option<String>,
    pub current_price_connection: Option<String>,
    pub timeout_secs: u64,
    /// Overrides the system's UTC offset, mostly useful on servers running in UTC.
    pub local_utc_offset_hours: Option<f64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            history: true,
            current_price: true,
            history_connection: Some("yahoo".to_string()),
            current_price_connection: Some("yahoo".to_string()),
            timeout_secs: 30,
            local_utc_offset_hours: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub quotes_url: String,
    pub history_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GoogleProviderConfig {
    pub history_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FxProviderConfig {
    pub quotes_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
    pub google: Option<GoogleProviderConfig>,
    pub fx: Option<FxProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                quotes_url: "http://download.finance.yahoo.com/d/quotes.csv".to_string(),
                history_url: "http://ichart.finance.yahoo.com/table.csv".to_string(),
            }),
            google: Some(GoogleProviderConfig {
                history_url: "http://www.google.com/finance/historical".to_string(),
            }),
            fx: Some(FxProviderConfig {
                quotes_url: "http://finance.yahoo.com/d/quotes.csv".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Id of the currency every stored rate is expressed against.
    pub base_currency: String,
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    pub instruments: Vec<InstrumentConfig>,
    pub data_path: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_history_days() -> u32 {
    30
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "quotesync", "quotesync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("org", "quotesync", "quotesync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.download.timeout_secs.max(1))
    }

    /// The offset exchange times are corrected to.
    pub fn local_offset(&self) -> FixedOffset {
        if let Some(hours) = self.download.local_utc_offset_hours {
            match FixedOffset::east_opt((hours * 3600.0).round() as i32) {
                Some(offset) => return offset,
                None => warn!(
                    "Ignoring invalid local UTC offset of {} hours, using system offset",
                    hours
                ),
            }
        }
        Local::now().offset().fix()
    }
}
