//! Persisted integer cursors for resumable batch work.

use std::{
   collections::BTreeMap,
   path::{Path, PathBuf},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{Result, util};

/// Key/value store of cursors. A missing key reads as zero.
#[async_trait]
pub trait CursorStore: Send + Sync {
   async fn get(&self, key: &str) -> Result<u64>;
   async fn set(&self, key: &str, value: u64) -> Result<()>;
   async fn clear(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
   cursors: Mutex<BTreeMap<String, u64>>,
}

impl MemoryCursorStore {
   pub fn new() -> Self {
      Self::default()
   }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
   async fn get(&self, key: &str) -> Result<u64> {
      Ok(self.cursors.lock().get(key).copied().unwrap_or(0))
   }

   async fn set(&self, key: &str, value: u64) -> Result<()> {
      self.cursors.lock().insert(key.to_string(), value);
      Ok(())
   }

   async fn clear(&self, key: &str) -> Result<()> {
      self.cursors.lock().remove(key);
      Ok(())
   }
}

/// Cursors kept in a JSON object on disk, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileCursorStore {
   path:    PathBuf,
   cursors: Mutex<BTreeMap<String, u64>>,
}

impl FileCursorStore {
   pub fn open(path: &Path) -> Result<Self> {
      let cursors = util::read_json(path)?.unwrap_or_default();
      Ok(Self { path: path.to_path_buf(), cursors: Mutex::new(cursors) })
   }

   /// All cursors, sorted by key.
   pub fn entries(&self) -> Vec<(String, u64)> {
      self
         .cursors
         .lock()
         .iter()
         .map(|(k, v)| (k.clone(), *v))
         .collect()
   }

   fn write(&self, cursors: &BTreeMap<String, u64>) -> Result<()> {
      util::write_json_atomic(&self.path, cursors)
   }
}

#[async_trait]
impl CursorStore for FileCursorStore {
   async fn get(&self, key: &str) -> Result<u64> {
      Ok(self.cursors.lock().get(key).copied().unwrap_or(0))
   }

   async fn set(&self, key: &str, value: u64) -> Result<()> {
      let mut cursors = self.cursors.lock();
      cursors.insert(key.to_string(), value);
      self.write(&cursors)
   }

   async fn clear(&self, key: &str) -> Result<()> {
      let mut cursors = self.cursors.lock();
      if cursors.remove(key).is_some() {
         self.write(&cursors)?;
      }
      Ok(())
   }
}
