use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Registry;
use crate::{
   Result,
   types::{ModelId, RegistryId, ReplicableType},
};

/// Row mutation applied atomically by [`RegistryStore::update`]. The row is
/// only committed when the closure returns `Ok`.
pub type Mutation<'a> = dyn Fn(&mut Registry) -> Result<()> + Send + Sync + 'a;

/// Row mutation used by batch scans. Returns whether the row changed.
pub type Transition<'a> = dyn Fn(&mut Registry) -> bool + Send + Sync + 'a;

pub type RegistryFilter<'a> = dyn Fn(&Registry) -> bool + Send + Sync + 'a;

/// Outcome of one [`RegistryStore::transition_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchScan {
   pub scanned: usize,
   pub updated: usize,
   pub last_id: Option<RegistryId>,
}

/// Persistence for registry rows.
///
/// Every method is atomic per row; none holds a lock across an await point
/// in the caller, so long-running work never blocks other workers.
#[async_trait]
pub trait RegistryStore: Send + Sync {
   async fn find(&self, ty: ReplicableType, model_id: ModelId) -> Result<Option<Registry>>;

   /// Returns the row, creating a pending one if absent. The flag is true
   /// when the row was created by this call.
   async fn find_or_initialize(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      now: DateTime<Utc>,
   ) -> Result<(Registry, bool)>;

   /// Applies `f` to the row and returns the committed copy.
   async fn update(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      f: &Mutation<'_>,
   ) -> Result<Registry>;

   /// Inserts pending rows for ids that have none; returns how many were created.
   async fn insert_pending(
      &self,
      ty: ReplicableType,
      model_ids: &[ModelId],
      now: DateTime<Utc>,
   ) -> Result<usize>;

   async fn delete(&self, ty: ReplicableType, model_id: ModelId) -> Result<bool>;

   async fn delete_model_ids(&self, ty: ReplicableType, model_ids: &[ModelId]) -> Result<usize>;

   /// Registry model ids greater than `after`, ascending.
   async fn model_ids_after(
      &self,
      ty: ReplicableType,
      after: ModelId,
      limit: usize,
   ) -> Result<Vec<ModelId>>;

   /// Registry model ids within `range`, ascending.
   async fn model_ids_in_range(
      &self,
      ty: ReplicableType,
      range: RangeInclusive<ModelId>,
   ) -> Result<Vec<ModelId>>;

   /// Applies `f` to up to `limit` rows with id greater than `after_id`, in
   /// id order.
   async fn transition_batch(
      &self,
      ty: ReplicableType,
      after_id: RegistryId,
      limit: usize,
      f: &Transition<'_>,
   ) -> Result<BatchScan>;

   /// Counts rows with id greater than `after_id` that match, stopping at `limit`.
   async fn count_after(
      &self,
      ty: ReplicableType,
      after_id: RegistryId,
      limit: usize,
      filter: &RegistryFilter<'_>,
   ) -> Result<usize>;

   /// Up to `limit` rows with id greater than `after_id`, in id order.
   async fn scan(
      &self,
      ty: ReplicableType,
      after_id: RegistryId,
      limit: usize,
   ) -> Result<Vec<Registry>>;

   /// All rows of `ty` that match.
   async fn select(
      &self,
      ty: ReplicableType,
      filter: &RegistryFilter<'_>,
   ) -> Result<Vec<Registry>>;
}
