//! Configuration management for retry policy, leases, batch sizes, and paths.

use std::{
   fs,
   path::{Path, PathBuf},
   sync::OnceLock,
   time::Duration,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub const MAX_BATCH_SIZE_CAP: usize = 100_000;

/// Application configuration loaded from config file and environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub retry_base_secs:                   u64,
   pub retry_cap_secs:                    u64,
   pub missing_on_primary_retry_cap_secs: u64,

   pub sync_lease_timeout_secs:    u64,
   pub removal_lease_timeout_secs: u64,
   pub retries_before_redownload:  u32,
   pub use_clone_on_first_sync:    bool,

   pub verification_timeout_secs:             u64,
   pub minimum_reverification_interval_secs: u64,

   pub consistency_batch_size:    usize,
   pub bulk_update_batch_size:    usize,
   pub verification_batch_size:   usize,
   pub reverification_batch_size: usize,

   pub housekeeping_gc_period:                 u64,
   pub housekeeping_full_repack_period:        u64,
   pub housekeeping_incremental_repack_period: u64,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         retry_base_secs: 30,
         retry_cap_secs: 60 * 60,
         missing_on_primary_retry_cap_secs: 4 * 60 * 60,
         sync_lease_timeout_secs: 8 * 60 * 60,
         removal_lease_timeout_secs: 60 * 60,
         retries_before_redownload: 10,
         use_clone_on_first_sync: true,
         verification_timeout_secs: 8 * 60 * 60,
         minimum_reverification_interval_secs: 7 * 24 * 60 * 60,
         consistency_batch_size: 1000,
         bulk_update_batch_size: 1000,
         verification_batch_size: 10,
         reverification_batch_size: 1000,
         housekeeping_gc_period: 200,
         housekeeping_full_repack_period: 50,
         housekeeping_incremental_repack_period: 10,
      }
   }
}

impl Config {
   pub fn load() -> Self {
      let config_path = ensure_global_config();

      Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(config_path))
         .merge(Env::prefixed("GEOSYNC_").lowercase(true))
         .extract()
         .inspect_err(|e| tracing::warn!("failed to parse config: {e}"))
         .unwrap_or_default()
   }

   fn create_default_config(path: &Path) {
      if let Some(parent) = path.parent() {
         let _ = fs::create_dir_all(parent);
      }
      let default_config = Self::default();
      if let Ok(toml) = toml::to_string_pretty(&default_config) {
         let _ = fs::write(path, toml);
      }
   }

   pub const fn sync_lease_timeout(&self) -> Duration {
      Duration::from_secs(self.sync_lease_timeout_secs)
   }

   pub const fn removal_lease_timeout(&self) -> Duration {
      Duration::from_secs(self.removal_lease_timeout_secs)
   }

   pub const fn verification_timeout(&self) -> Duration {
      Duration::from_secs(self.verification_timeout_secs)
   }

   pub const fn minimum_reverification_interval(&self) -> Duration {
      Duration::from_secs(self.minimum_reverification_interval_secs)
   }

   pub fn effective_consistency_batch_size(&self) -> usize {
      self.consistency_batch_size.clamp(1, MAX_BATCH_SIZE_CAP)
   }

   pub fn effective_bulk_update_batch_size(&self) -> usize {
      self.bulk_update_batch_size.clamp(1, MAX_BATCH_SIZE_CAP)
   }

   pub fn effective_verification_batch_size(&self) -> usize {
      self.verification_batch_size.clamp(1, MAX_BATCH_SIZE_CAP)
   }

   pub fn effective_reverification_batch_size(&self) -> usize {
      self.reverification_batch_size.clamp(1, MAX_BATCH_SIZE_CAP)
   }

   pub fn validate(&self) -> Result<()> {
      if self.retry_base_secs == 0 {
         return Err(ConfigError::Invalid("retry_base_secs must be positive".to_string()).into());
      }
      if self.retry_cap_secs > self.missing_on_primary_retry_cap_secs {
         return Err(
            ConfigError::Invalid(format!(
               "retry_cap_secs {} exceeds missing_on_primary_retry_cap_secs {}",
               self.retry_cap_secs, self.missing_on_primary_retry_cap_secs
            ))
            .into(),
         );
      }
      if self.sync_lease_timeout_secs == 0 {
         return Err(
            ConfigError::Invalid("sync_lease_timeout_secs must be positive".to_string()).into(),
         );
      }
      Ok(())
   }
}

/// Returns the global configuration instance
pub fn get() -> &'static Config {
   CONFIG.get_or_init(Config::load)
}

/// Returns the base directory for geosync data and configuration
pub fn base_dir() -> &'static PathBuf {
   static ONCE: OnceLock<PathBuf> = OnceLock::new();
   ONCE.get_or_init(|| resolve_base_dir(".geosync"))
}

fn ensure_global_config() -> PathBuf {
   let config_path = config_file_path();
   if !config_path.exists() {
      Config::create_default_config(config_path);
   }
   config_path.clone()
}

fn resolve_base_dir(dir_name: &str) -> PathBuf {
   BaseDirs::new()
      .map(|d| d.home_dir().join(dir_name))
      .or_else(|| {
         std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(dir_name))
      })
      .unwrap_or_else(|| {
         std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(dir_name)
      })
}

macro_rules! define_paths {
   ($($fn_name:ident: $path:literal),* $(,)?) => {
      $(
         pub fn $fn_name() -> &'static PathBuf {
            static ONCE: OnceLock<PathBuf> = OnceLock::new();
            ONCE.get_or_init(|| base_dir().join($path))
         }
      )*
   };
}

define_paths! {
   config_file_path: "config.toml",
   data_dir: "data",
}
