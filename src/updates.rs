//! "Object updated on the primary" signals.
//!
//! The sync orchestrator consults this log after a transfer: an update that
//! arrived while the transfer was running means the copy may already be stale.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
   Result,
   types::{ModelId, ReplicableType},
};

#[async_trait]
pub trait UpdateLog: Send + Sync {
   async fn record(&self, ty: ReplicableType, model_id: ModelId, at: DateTime<Utc>) -> Result<()>;

   /// Whether an update was recorded at or after `since`.
   async fn updated_since(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      since: DateTime<Utc>,
   ) -> Result<bool>;
}

/// Keeps the latest update time per object.
#[derive(Debug, Default)]
pub struct MemoryUpdateLog {
   latest: RwLock<HashMap<(ReplicableType, ModelId), DateTime<Utc>>>,
}

impl MemoryUpdateLog {
   pub fn new() -> Self {
      Self::default()
   }
}

#[async_trait]
impl UpdateLog for MemoryUpdateLog {
   async fn record(&self, ty: ReplicableType, model_id: ModelId, at: DateTime<Utc>) -> Result<()> {
      self
         .latest
         .write()
         .entry((ty, model_id))
         .and_modify(|latest| *latest = (*latest).max(at))
         .or_insert(at);
      Ok(())
   }

   async fn updated_since(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      since: DateTime<Utc>,
   ) -> Result<bool> {
      Ok(self
         .latest
         .read()
         .get(&(ty, model_id))
         .is_some_and(|latest| *latest >= since))
   }
}
