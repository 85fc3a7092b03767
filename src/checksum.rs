//! Local-copy checksums.

use std::{
   fs,
   path::{Path, PathBuf},
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::{
   Result,
   error::Error,
   types::{ModelId, ReplicableType},
};

/// Digest reported for a local copy that does not exist.
pub const ZERO_CHECKSUM: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Computes the checksum of this site's copy of an object, in the same format
/// the primary records.
#[async_trait]
pub trait ChecksumProvider: Send + Sync {
   async fn checksum(&self, ty: ReplicableType, model_id: ModelId) -> Result<String>;
}

/// Checksums objects stored under `<root>/<type>/<model_id>`.
///
/// A file hashes to the SHA-256 of its content. A directory hashes to the XOR
/// of SHA-256(relative path, NUL, content) over its files, which makes the
/// result independent of traversal order.
#[derive(Debug, Clone)]
pub struct FileSystemChecksum {
   root: PathBuf,
}

impl FileSystemChecksum {
   pub fn new(root: impl Into<PathBuf>) -> Self {
      Self { root: root.into() }
   }

   pub fn object_path(&self, ty: ReplicableType, model_id: ModelId) -> PathBuf {
      self.root.join(ty.as_str()).join(model_id.to_string())
   }
}

#[async_trait]
impl ChecksumProvider for FileSystemChecksum {
   async fn checksum(&self, ty: ReplicableType, model_id: ModelId) -> Result<String> {
      let path = self.object_path(ty, model_id);
      tokio::task::spawn_blocking(move || checksum_path(&path))
         .await
         .map_err(|e| Error::Checksum(format!("checksum task failed: {e}")))?
   }
}

/// Checksum of a file or directory tree; missing paths yield [`ZERO_CHECKSUM`].
pub fn checksum_path(path: &Path) -> Result<String> {
   let metadata = match fs::metadata(path) {
      Ok(metadata) => metadata,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ZERO_CHECKSUM.to_string()),
      Err(e) => return Err(e.into()),
   };

   if metadata.is_file() {
      return Ok(hex::encode(Sha256::digest(fs::read(path)?)));
   }

   let mut acc = [0u8; 32];
   for entry in WalkDir::new(path).follow_links(false) {
      let entry = entry.map_err(|e| Error::Checksum(e.to_string()))?;
      if !entry.file_type().is_file() {
         continue;
      }
      let rel = entry
         .path()
         .strip_prefix(path)
         .map_err(|e| Error::Checksum(e.to_string()))?;

      let mut hasher = Sha256::new();
      hasher.update(rel.to_string_lossy().as_bytes());
      hasher.update([0u8]);
      hasher.update(fs::read(entry.path())?);
      for (a, b) in acc.iter_mut().zip(hasher.finalize()) {
         *a ^= b;
      }
   }
   Ok(hex::encode(acc))
}
