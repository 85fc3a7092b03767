//! Utility functions for filesystem operations

use std::{
   fs::{self, File},
   path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};

use crate::{Result, error::Error};

/// Reads a JSON document, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
   match fs::read_to_string(path) {
      Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
   }
}

/// Writes `value` as pretty JSON via a temp file and rename, then syncs the
/// parent directory so the rename survives a crash.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   let tmp_path = temp_path(path)?;
   let data = serde_json::to_string_pretty(value)?;
   fs::write(&tmp_path, data)?;
   fs::rename(&tmp_path, path)?;
   if let Some(parent) = path.parent() {
      fsync_dir(parent)?;
   }
   Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf> {
   let name = path
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| Error::Store { op: "write", reason: format!("invalid path {}", path.display()) })?;
   Ok(path.with_file_name(format!("{name}.tmp")))
}

#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> Result<()> {
   File::open(dir)?.sync_all()?;
   Ok(())
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> Result<()> {
   Ok(())
}
