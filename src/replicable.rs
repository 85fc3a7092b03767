//! Read-only view of the primary's replicable objects.

use std::{
   collections::BTreeMap,
   ops::{Bound, RangeInclusive},
   path::Path,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
   Result,
   types::{ModelId, ReplicableType},
   util,
};

/// Enumerates replicable objects the secondary should hold.
#[async_trait]
pub trait ReplicableModels: Send + Sync {
   /// Ids greater than `after`, ascending.
   async fn ids_after(&self, ty: ReplicableType, after: ModelId, limit: usize)
   -> Result<Vec<ModelId>>;

   /// Ids within `range`, ascending.
   async fn ids_in_range(
      &self,
      ty: ReplicableType,
      range: RangeInclusive<ModelId>,
   ) -> Result<Vec<ModelId>>;

   /// Checksum the primary recorded for the object, if any.
   async fn primary_checksum(&self, ty: ReplicableType, model_id: ModelId)
   -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicableRecord {
   pub replicable_type: ReplicableType,
   pub id:              ModelId,
   #[serde(default)]
   pub checksum:        Option<String>,
}

/// In-memory replicable set, loadable from a JSON array of
/// [`ReplicableRecord`]s.
#[derive(Debug, Default)]
pub struct MemoryReplicables {
   models: RwLock<BTreeMap<(ReplicableType, ModelId), Option<String>>>,
}

impl MemoryReplicables {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_ids(ty: ReplicableType, ids: impl IntoIterator<Item = ModelId>) -> Self {
      let this = Self::new();
      for id in ids {
         this.insert(ty, id, None);
      }
      this
   }

   pub fn load(path: &Path) -> Result<Self> {
      let records: Vec<ReplicableRecord> = util::read_json(path)?.unwrap_or_default();
      let this = Self::new();
      for record in records {
         this.insert(record.replicable_type, record.id, record.checksum);
      }
      Ok(this)
   }

   pub fn insert(&self, ty: ReplicableType, id: ModelId, checksum: Option<String>) {
      self.models.write().insert((ty, id), checksum);
   }

   pub fn remove(&self, ty: ReplicableType, id: ModelId) {
      self.models.write().remove(&(ty, id));
   }

   pub fn set_checksum(&self, ty: ReplicableType, id: ModelId, checksum: Option<String>) {
      if let Some(slot) = self.models.write().get_mut(&(ty, id)) {
         *slot = checksum;
      }
   }

   fn range(
      &self,
      ty: ReplicableType,
      lower: Bound<ModelId>,
      upper: ModelId,
      limit: usize,
   ) -> Vec<ModelId> {
      let lower = match lower {
         Bound::Included(id) => Bound::Included((ty, id)),
         Bound::Excluded(id) => Bound::Excluded((ty, id)),
         Bound::Unbounded => Bound::Included((ty, ModelId::MIN)),
      };
      self
         .models
         .read()
         .range((lower, Bound::Included((ty, upper))))
         .map(|((_, id), _)| *id)
         .take(limit)
         .collect()
   }
}

#[async_trait]
impl ReplicableModels for MemoryReplicables {
   async fn ids_after(
      &self,
      ty: ReplicableType,
      after: ModelId,
      limit: usize,
   ) -> Result<Vec<ModelId>> {
      Ok(self.range(ty, Bound::Excluded(after), ModelId::MAX, limit))
   }

   async fn ids_in_range(
      &self,
      ty: ReplicableType,
      range: RangeInclusive<ModelId>,
   ) -> Result<Vec<ModelId>> {
      if range.is_empty() {
         return Ok(Vec::new());
      }
      let (start, end) = range.into_inner();
      Ok(self.range(ty, Bound::Included(start), end, usize::MAX))
   }

   async fn primary_checksum(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
   ) -> Result<Option<String>> {
      Ok(self.models.read().get(&(ty, model_id)).cloned().flatten())
   }
}
