//! CLI command implementations for geosync.
//!
//! Every command works against a data directory holding the registry rows,
//! the replicable set exported from the primary, persisted cursors and the
//! outgoing job queue. The directory is locked for the whole command, shared
//! for read-only commands.

pub mod action;
pub mod bulk;
pub mod cursor;
pub mod queue;
pub mod reconcile;
pub mod remove;
pub mod status;
pub mod verify;

use std::{
   fs,
   path::{Path, PathBuf},
   sync::Arc,
};

use crate::{
   Result,
   cursor::FileCursorStore,
   data_lock::DataDirLock,
   registry::MemoryRegistryStore,
   replicable::MemoryReplicables,
   scheduler::FileQueueScheduler,
   types::ReplicableType,
};

pub const REGISTRIES_FILE: &str = "registries.json";
pub const REPLICABLES_FILE: &str = "replicables.json";
pub const CURSORS_FILE: &str = "cursors.json";
pub const QUEUE_FILE: &str = "queue.jsonl";

/// Stores backed by one data directory.
pub struct Workspace {
   pub data_dir:    PathBuf,
   pub registries:  Arc<MemoryRegistryStore>,
   pub replicables: Arc<MemoryReplicables>,
   pub cursors:     Arc<FileCursorStore>,
   pub scheduler:   Arc<FileQueueScheduler>,
   _lock:           DataDirLock,
}

impl Workspace {
   pub fn open(data_dir: &Path) -> Result<Self> {
      fs::create_dir_all(data_dir)?;
      let lock = DataDirLock::acquire_exclusive(data_dir)?;
      Self::with_lock(data_dir, lock)
   }

   /// Opens the workspace for commands that never persist.
   pub fn open_read_only(data_dir: &Path) -> Result<Self> {
      fs::create_dir_all(data_dir)?;
      let lock = DataDirLock::acquire_shared(data_dir)?;
      Self::with_lock(data_dir, lock)
   }

   fn with_lock(data_dir: &Path, lock: DataDirLock) -> Result<Self> {
      Ok(Self {
         data_dir:    data_dir.to_path_buf(),
         registries:  Arc::new(MemoryRegistryStore::open(&data_dir.join(REGISTRIES_FILE))?),
         replicables: Arc::new(MemoryReplicables::load(&data_dir.join(REPLICABLES_FILE))?),
         cursors:     Arc::new(FileCursorStore::open(&data_dir.join(CURSORS_FILE))?),
         scheduler:   Arc::new(FileQueueScheduler::new(data_dir.join(QUEUE_FILE))),
         _lock:       lock,
      })
   }

   /// Local copies of replicated objects, `<objects>/<type>/<model_id>`.
   pub fn objects_dir(&self) -> PathBuf {
      self.data_dir.join("objects")
   }

   pub fn lease_dir(&self) -> PathBuf {
      self.data_dir.join("leases")
   }

   /// Writes registry rows back to disk.
   pub fn persist(&self) -> Result<()> {
      self.registries.persist()
   }
}

/// The given type, or every type.
pub fn selected_types(ty: Option<ReplicableType>) -> Vec<ReplicableType> {
   ty.map_or_else(|| ReplicableType::ALL.to_vec(), |ty| vec![ty])
}

pub(crate) fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
   println!("{}", serde_json::to_string_pretty(value)?);
   Ok(())
}
