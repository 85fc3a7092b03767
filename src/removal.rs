//! Removal of an object's local copy together with its registry row.

use std::{
   fs,
   path::PathBuf,
   sync::Arc,
   time::Duration,
};

use async_trait::async_trait;

use crate::{
   Result,
   config::Config,
   error::Error,
   lease::{ExclusiveLease, lease_key},
   registry::RegistryStore,
   types::{ModelId, ReplicableType},
};

pub const LEASE_SERVICE: &str = "geo_registry_removal_service";

/// This site's storage of replicated objects.
#[async_trait]
pub trait LocalStorage: Send + Sync {
   /// Deletes the local copy; returns whether anything existed.
   async fn remove(&self, ty: ReplicableType, model_id: ModelId) -> Result<bool>;
}

/// Objects stored as files or directories under `<root>/<type>/<model_id>`.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
   root: PathBuf,
}

impl FileSystemStorage {
   pub fn new(root: impl Into<PathBuf>) -> Self {
      Self { root: root.into() }
   }

   pub fn object_path(&self, ty: ReplicableType, model_id: ModelId) -> PathBuf {
      self.root.join(ty.as_str()).join(model_id.to_string())
   }
}

#[async_trait]
impl LocalStorage for FileSystemStorage {
   async fn remove(&self, ty: ReplicableType, model_id: ModelId) -> Result<bool> {
      let path = self.object_path(ty, model_id);
      tokio::task::spawn_blocking(move || {
         let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
         };
         if metadata.is_dir() {
            fs::remove_dir_all(&path)?;
         } else {
            fs::remove_file(&path)?;
         }
         Ok(true)
      })
      .await
      .map_err(|e| Error::LocalStorage(format!("removal task failed: {e}")))?
      .map_err(|e| Error::LocalStorage(e.to_string()))
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
   LeaseTaken,
   Removed { local_copy: bool, registry: bool },
}

pub struct RegistryRemovalService {
   registries:    Arc<dyn RegistryStore>,
   lease:         Arc<dyn ExclusiveLease>,
   storage:       Arc<dyn LocalStorage>,
   lease_timeout: Duration,
}

impl RegistryRemovalService {
   pub fn new(
      registries: Arc<dyn RegistryStore>,
      lease: Arc<dyn ExclusiveLease>,
      storage: Arc<dyn LocalStorage>,
      cfg: &Config,
   ) -> Self {
      Self { registries, lease, storage, lease_timeout: cfg.removal_lease_timeout() }
   }

   /// Deletes the local copy, then the registry row. If the local copy cannot
   /// be removed the row stays, so the removal can be retried.
   pub async fn execute(&self, ty: ReplicableType, model_id: ModelId) -> Result<RemovalOutcome> {
      let key = lease_key(LEASE_SERVICE, ty, model_id);
      let Some(token) = self.lease.try_obtain(&key, self.lease_timeout).await? else {
         tracing::debug!(replicable_type = %ty, model_id, "removal lease taken, skipping");
         return Ok(RemovalOutcome::LeaseTaken);
      };

      let removed = self.remove_locked(ty, model_id).await;
      let released = self.lease.cancel(&key, &token).await;
      let outcome = removed?;
      released?;
      Ok(outcome)
   }

   async fn remove_locked(&self, ty: ReplicableType, model_id: ModelId) -> Result<RemovalOutcome> {
      let local_copy = self.storage.remove(ty, model_id).await?;
      let registry = self.registries.delete(ty, model_id).await?;
      tracing::info!(replicable_type = %ty, model_id, local_copy, registry, "registry removed");
      Ok(RemovalOutcome::Removed { local_copy, registry })
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;

   use super::*;
   use crate::{lease::MemoryLease, registry::MemoryRegistryStore};

   struct BrokenStorage;

   #[async_trait]
   impl LocalStorage for BrokenStorage {
      async fn remove(&self, _ty: ReplicableType, _model_id: ModelId) -> Result<bool> {
         Err(Error::LocalStorage("read-only file system".to_string()))
      }
   }

   #[tokio::test]
   async fn removes_file_then_row() {
      let dir = tempfile::tempdir().expect("tempdir");
      let storage = FileSystemStorage::new(dir.path());
      let path = storage.object_path(ReplicableType::Upload, 3);
      fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
      fs::write(&path, b"data").expect("write");

      let registries = Arc::new(MemoryRegistryStore::new());
      registries
         .insert_pending(ReplicableType::Upload, &[3], Utc::now())
         .await
         .expect("insert");
      let service = RegistryRemovalService::new(
         registries.clone(),
         Arc::new(MemoryLease::default()),
         Arc::new(storage),
         &Config::default(),
      );

      let outcome = service.execute(ReplicableType::Upload, 3).await.expect("remove");
      assert_eq!(outcome, RemovalOutcome::Removed { local_copy: true, registry: true });
      assert!(!path.exists());
      assert!(registries.is_empty());
   }

   #[tokio::test]
   async fn storage_failure_keeps_row_and_releases_lease() {
      let registries = Arc::new(MemoryRegistryStore::new());
      registries
         .insert_pending(ReplicableType::Wiki, &[8], Utc::now())
         .await
         .expect("insert");
      let lease = Arc::new(MemoryLease::default());
      let service = RegistryRemovalService::new(
         registries.clone(),
         lease.clone(),
         Arc::new(BrokenStorage),
         &Config::default(),
      );

      let err = service.execute(ReplicableType::Wiki, 8).await.expect_err("storage fails");
      assert!(matches!(err, Error::LocalStorage(_)));
      assert_eq!(registries.len(), 1);
      assert!(!lease.is_held(&lease_key(LEASE_SERVICE, ReplicableType::Wiki, 8)));
   }
}
