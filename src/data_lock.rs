//! Cross-process lock over a data directory.
//!
//! CLI commands read, modify and rewrite several JSON files; holding this lock
//! for the whole command keeps two invocations from interleaving.

use std::{
   fs::{self, File, OpenOptions},
   path::{Path, PathBuf},
};

use fs4::FileExt;

use crate::Result;

pub struct DataDirLock {
   file: File,
}

impl DataDirLock {
   fn lock_path(data_dir: &Path) -> PathBuf {
      data_dir.join("locks").join("data.lock")
   }

   fn open(data_dir: &Path) -> Result<File> {
      let lock_path = Self::lock_path(data_dir);
      if let Some(parent) = lock_path.parent() {
         fs::create_dir_all(parent)?;
      }
      Ok(OpenOptions::new()
         .create(true)
         .truncate(false)
         .read(true)
         .write(true)
         .open(&lock_path)?)
   }

   /// Shared lock for read-only commands.
   pub fn acquire_shared(data_dir: &Path) -> Result<Self> {
      let file = Self::open(data_dir)?;
      FileExt::lock_shared(&file)?;
      Ok(Self { file })
   }

   pub fn acquire_exclusive(data_dir: &Path) -> Result<Self> {
      let file = Self::open(data_dir)?;
      FileExt::lock_exclusive(&file)?;
      Ok(Self { file })
   }
}

impl Drop for DataDirLock {
   fn drop(&mut self) {
      let _ = FileExt::unlock(&self.file);
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn shared_locks_coexist() {
      let dir = tempfile::tempdir().expect("tempdir");
      let first = DataDirLock::acquire_shared(dir.path()).expect("first");
      let second = DataDirLock::acquire_shared(dir.path()).expect("second");
      drop((first, second));
      let _exclusive = DataDirLock::acquire_exclusive(dir.path()).expect("exclusive");
   }
}
