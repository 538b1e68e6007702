//! Runtime configuration for table-cache-tier.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Store capacity, eviction weights and the per-database cache policies
//! all live here and are read once at startup.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::table::ids::DatabaseId;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "table-cache-tier", about = "Cached statistical table server")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Bounded store sizing.
    pub store: StoreConfig,

    /// Eviction policy tuning.
    pub eviction: EvictionConfig,

    /// Databases served, each with its own cache policy.
    pub databases: Vec<DatabaseConfig>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Capacity and watermarks of the in-process store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Total nominal bytes the store may hold.
    pub capacity_bytes: usize,

    /// Start evicting when usage exceeds this fraction of capacity.
    pub high_watermark: f64,

    /// Stop evicting when usage drops below this fraction.
    pub low_watermark: f64,

    /// How often the background scanner purges expired entries (0 = never).
    pub expiration_scan_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 512 * 1024 * 1024, // 512 MB
            high_watermark: 0.90,
            low_watermark: 0.75,
            expiration_scan_interval_secs: 30,
        }
    }
}

/// Victim scoring weights within one priority class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Weight for seconds since last access.
    pub age_weight: f64,

    /// Weight for entry size as a fraction of store capacity.
    pub size_weight: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            age_weight: 1.0,
            size_weight: 100.0,
        }
    }
}

/// One served database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub id: DatabaseId,

    /// Directory holding the table files.
    pub root_path: PathBuf,

    /// Extension of table files, without the dot.
    #[serde(default = "default_extension")]
    pub file_extension: String,

    /// How long cached entries are trusted without checking the file's
    /// modification time, in milliseconds (0 = forever).
    #[serde(default)]
    pub revalidation_interval_ms: u64,

    #[serde(default)]
    pub cache: CachePolicy,
}

fn default_extension() -> String {
    "px".to_string()
}

/// Expiration and nominal cost for each cache tier of a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub file_list: TierPolicy,
    pub last_modified: TierPolicy,
    pub metadata: TierPolicy,
    /// `size` is per cell; a data entry costs `size * map.size()`.
    pub data: TierPolicy,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            file_list: TierPolicy {
                sliding_expiration_secs: Some(15 * 60),
                absolute_expiration_secs: None,
                size: 1,
            },
            last_modified: TierPolicy {
                sliding_expiration_secs: None,
                absolute_expiration_secs: None,
                size: 1,
            },
            metadata: TierPolicy {
                sliding_expiration_secs: Some(15 * 60),
                absolute_expiration_secs: None,
                size: 1024,
            },
            data: TierPolicy {
                sliding_expiration_secs: Some(5 * 60),
                absolute_expiration_secs: None,
                size: 8,
            },
        }
    }
}

/// Expiration and cost of entries in one tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierPolicy {
    pub sliding_expiration_secs: Option<u64>,
    pub absolute_expiration_secs: Option<u64>,
    pub size: usize,
}

impl TierPolicy {
    pub fn sliding_expiration(&self) -> Option<Duration> {
        self.sliding_expiration_secs.map(Duration::from_secs)
    }

    pub fn absolute_expiration(&self) -> Option<Duration> {
        self.absolute_expiration_secs.map(Duration::from_secs)
    }
}

impl DatabaseConfig {
    pub fn revalidation_interval(&self) -> Option<Duration> {
        match self.revalidation_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let store = &self.store;
        if !(0.0..=1.0).contains(&store.low_watermark)
            || !(0.0..=1.0).contains(&store.high_watermark)
            || store.low_watermark > store.high_watermark
        {
            anyhow::bail!(
                "watermarks must satisfy 0 <= low ({}) <= high ({}) <= 1",
                store.low_watermark,
                store.high_watermark
            );
        }
        let mut seen = std::collections::HashSet::new();
        for db in &self.databases {
            if !seen.insert(&db.id) {
                anyhow::bail!("database '{}' configured twice", db.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert!(cfg.databases.is_empty());
        assert_eq!(cfg.store.high_watermark, 0.90);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_database_section() {
        let json = r#"{
            "databases": [
                { "id": "stat", "root_path": "/data/stat", "revalidation_interval_ms": 1000,
                  "cache": { "data": { "sliding_expiration_secs": 60, "size": 16 } } }
            ]
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        let db = &cfg.databases[0];
        assert_eq!(db.id.as_str(), "stat");
        assert_eq!(db.file_extension, "px");
        assert_eq!(db.revalidation_interval(), Some(Duration::from_millis(1000)));
        assert_eq!(db.cache.data.size, 16);
        // Unspecified tiers keep their defaults.
        assert_eq!(db.cache.metadata.size, 1024);
    }

    #[test]
    fn test_zero_revalidation_means_forever() {
        let json = r#"{ "id": "x", "root_path": "/tmp" }"#;
        let db: DatabaseConfig = serde_json::from_str(json).unwrap();
        assert_eq!(db.revalidation_interval(), None);
    }

    #[test]
    fn test_invalid_database_id_rejected() {
        let json = r#"{ "id": "bad id", "root_path": "/tmp" }"#;
        assert!(serde_json::from_str::<DatabaseConfig>(json).is_err());
    }

    #[test]
    fn test_duplicate_database_rejected() {
        let json = r#"{ "databases": [
            { "id": "a", "root_path": "/tmp" },
            { "id": "a", "root_path": "/var" }
        ] }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_err());
    }
}
