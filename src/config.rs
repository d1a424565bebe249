//! Layered engine configuration using Figment.
//!
//! Configuration is merged from, lowest priority first:
//! 1. Built-in defaults ([`DaftConfig::default`])
//! 2. A TOML file (`daft.toml` unless a path is given; a missing file is skipped)
//! 3. Environment variables prefixed with `DAFT_`, nested with `__`
//!
//! # Environment Variables
//!
//! - `DAFT_ENGINE__CHUNKSIZE=1048576` → `engine.chunksize`
//! - `DAFT_CACHE__BUDGET_BYTES=268435456` → `cache.budget_bytes`
//! - `DAFT_STORE__PATH=/scratch/daft` → `store.path`
//! - `DAFT_LOGGING__LEVEL=debug` → `logging.level`
//!
//! # Example
//! ```no_run
//! use daft::config::DaftConfig;
//!
//! let config = DaftConfig::load()?;
//! println!("chunksize: {}", config.engine.chunksize);
//! # Ok::<(), daft::DaftError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use daft_cache::{BlockCache, CacheConfig};
use daft_store::{ArrayStore, MmapStore};

use crate::error::{DaftError, DaftResult};
use crate::logging::LogFormat;
use crate::scheduler::DEFAULT_CHUNKSIZE;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "daft.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DAFT_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaftConfig {
    pub engine: EngineConfig,
    pub cache: CacheSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

/// Transform engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest sub-problem transformed in memory, in elements.
    pub chunksize: usize,
    /// Worker threads per level (0 = available parallelism).
    pub workers: usize,
    /// Reject non-finite samples before transforming a leaf.
    pub check_finite: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunksize: DEFAULT_CHUNKSIZE,
            workers: 0,
            check_finite: true,
        }
    }
}

/// Block cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Resident byte budget.
    pub budget_bytes: usize,
    /// Directory for spilled blocks. Without it evicted blocks are recomputed.
    pub spill_dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            budget_bytes: CacheConfig::default().budget_bytes,
            spill_dir: None,
        }
    }
}

/// Persistent dataset store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFormat {
    /// Directory of memory-mapped `.c128` files.
    #[default]
    Mmap,
    /// Single HDF5 file (requires the `storage_hdf5` feature).
    Hdf5,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub format: StoreFormat,
    /// Store directory (mmap) or file (hdf5).
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            format: StoreFormat::Mmap,
            path: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error.
    pub level: String,
    /// pretty, compact or json.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl DaftConfig {
    /// Load from `daft.toml` in the working directory and the environment.
    pub fn load() -> DaftResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific TOML file and the environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DaftResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// The merged provider stack, before extraction.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values that parse but cannot run.
    pub fn validate(&self) -> DaftResult<()> {
        if self.engine.chunksize == 0 {
            return Err(DaftError::Config(
                "engine.chunksize must be at least 1".into(),
            ));
        }
        if self.cache.budget_bytes == 0 {
            return Err(DaftError::Config(
                "cache.budget_bytes must be at least 1".into(),
            ));
        }
        if !VALID_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DaftError::Config(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }
        if self.logging.format.parse::<LogFormat>().is_err() {
            return Err(DaftError::Config(format!(
                "Invalid logging.format '{}'. Must be one of: pretty, compact, json",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Block cache with the configured budget and optional spill directory.
    pub fn build_cache(&self) -> DaftResult<BlockCache> {
        let config = CacheConfig::with_budget(self.cache.budget_bytes);
        Ok(match &self.cache.spill_dir {
            Some(dir) => BlockCache::with_spill(config, Arc::new(MmapStore::open(dir)?)),
            None => BlockCache::new(config),
        })
    }

    /// Open the configured dataset store.
    pub fn open_store(&self) -> DaftResult<Box<dyn ArrayStore>> {
        match self.store.format {
            StoreFormat::Mmap => Ok(Box::new(MmapStore::open(&self.store.path)?)),
            #[cfg(feature = "storage_hdf5")]
            StoreFormat::Hdf5 => Ok(Box::new(daft_store::Hdf5Store::open(&self.store.path)?)),
            #[cfg(not(feature = "storage_hdf5"))]
            StoreFormat::Hdf5 => Err(DaftError::Config(
                "store.format 'hdf5' requires the storage_hdf5 feature".into(),
            )),
        }
    }
}
