//! In-process registry store, optionally persisted to a JSON file.

use std::{
   collections::BTreeMap,
   ops::{Bound, RangeInclusive},
   path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{BatchScan, Mutation, Registry, RegistryFilter, RegistryStore, Transition};
use crate::{
   Result,
   error::Error,
   types::{ModelId, RegistryId, ReplicableType},
   util,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
   next_id: RegistryId,
   rows:    Vec<Registry>,
}

#[derive(Debug, Default)]
struct Inner {
   next_id:  RegistryId,
   rows:     BTreeMap<RegistryId, Registry>,
   by_model: BTreeMap<(ReplicableType, ModelId), RegistryId>,
}

impl Inner {
   fn from_snapshot(snapshot: Snapshot) -> Self {
      let mut inner = Self { next_id: snapshot.next_id, ..Self::default() };
      for row in snapshot.rows {
         inner.next_id = inner.next_id.max(row.id);
         inner.by_model.insert((row.replicable_type, row.model_id), row.id);
         inner.rows.insert(row.id, row);
      }
      inner
   }

   fn snapshot(&self) -> Snapshot {
      Snapshot { next_id: self.next_id, rows: self.rows.values().cloned().collect() }
   }

   fn insert(&mut self, ty: ReplicableType, model_id: ModelId, now: DateTime<Utc>) -> &Registry {
      self.next_id += 1;
      let id = self.next_id;
      self.by_model.insert((ty, model_id), id);
      self.rows.entry(id).or_insert_with(|| Registry::new(id, ty, model_id, now))
   }

   fn remove(&mut self, ty: ReplicableType, model_id: ModelId) -> bool {
      match self.by_model.remove(&(ty, model_id)) {
         Some(id) => self.rows.remove(&id).is_some(),
         None => false,
      }
   }

   fn model_ids(
      &self,
      ty: ReplicableType,
      lower: Bound<ModelId>,
      upper: Bound<ModelId>,
   ) -> impl Iterator<Item = ModelId> + '_ {
      let lower = match lower {
         Bound::Included(id) => Bound::Included((ty, id)),
         Bound::Excluded(id) => Bound::Excluded((ty, id)),
         Bound::Unbounded => Bound::Included((ty, ModelId::MIN)),
      };
      let upper = match upper {
         Bound::Included(id) => Bound::Included((ty, id)),
         Bound::Excluded(id) => Bound::Excluded((ty, id)),
         Bound::Unbounded => Bound::Included((ty, ModelId::MAX)),
      };
      self.by_model.range((lower, upper)).map(|((_, model_id), _)| *model_id)
   }

   fn rows_after(
      &self,
      ty: ReplicableType,
      after_id: RegistryId,
   ) -> impl Iterator<Item = &Registry> + '_ {
      self
         .rows
         .range((Bound::Excluded(after_id), Bound::Unbounded))
         .map(|(_, row)| row)
         .filter(move |row| row.replicable_type == ty)
   }
}

/// Registry store backed by ordered maps behind a lock.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
   inner: RwLock<Inner>,
   path:  Option<PathBuf>,
}

impl MemoryRegistryStore {
   pub fn new() -> Self {
      Self::default()
   }

   /// Loads rows from `path` if it exists; [`Self::persist`] writes them back.
   pub fn open(path: &Path) -> Result<Self> {
      let snapshot: Snapshot = util::read_json(path)?.unwrap_or_default();
      Ok(Self { inner: RwLock::new(Inner::from_snapshot(snapshot)), path: Some(path.to_path_buf()) })
   }

   pub fn persist(&self) -> Result<()> {
      let Some(path) = &self.path else {
         return Ok(());
      };
      let snapshot = self.inner.read().snapshot();
      util::write_json_atomic(path, &snapshot)
   }

   pub fn len(&self) -> usize {
      self.inner.read().rows.len()
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }

   /// Every row of every type, in id order.
   pub fn all(&self) -> Vec<Registry> {
      self.inner.read().rows.values().cloned().collect()
   }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
   async fn find(&self, ty: ReplicableType, model_id: ModelId) -> Result<Option<Registry>> {
      let inner = self.inner.read();
      Ok(inner
         .by_model
         .get(&(ty, model_id))
         .and_then(|id| inner.rows.get(id))
         .cloned())
   }

   async fn find_or_initialize(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      now: DateTime<Utc>,
   ) -> Result<(Registry, bool)> {
      let mut inner = self.inner.write();
      if let Some(row) = inner.by_model.get(&(ty, model_id)).and_then(|id| inner.rows.get(id)) {
         return Ok((row.clone(), false));
      }
      Ok((inner.insert(ty, model_id, now).clone(), true))
   }

   async fn update(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      f: &Mutation<'_>,
   ) -> Result<Registry> {
      let mut inner = self.inner.write();
      let id = *inner
         .by_model
         .get(&(ty, model_id))
         .ok_or(Error::RegistryNotFound { replicable_type: ty, model_id })?;
      let row = inner
         .rows
         .get_mut(&id)
         .ok_or_else(|| Error::Store { op: "update", reason: format!("dangling registry id {id}") })?;

      let mut draft = row.clone();
      f(&mut draft)?;
      *row = draft;
      Ok(row.clone())
   }

   async fn insert_pending(
      &self,
      ty: ReplicableType,
      model_ids: &[ModelId],
      now: DateTime<Utc>,
   ) -> Result<usize> {
      let mut inner = self.inner.write();
      let mut created = 0;
      for &model_id in model_ids {
         if !inner.by_model.contains_key(&(ty, model_id)) {
            inner.insert(ty, model_id, now);
            created += 1;
         }
      }
      Ok(created)
   }

   async fn delete(&self, ty: ReplicableType, model_id: ModelId) -> Result<bool> {
      Ok(self.inner.write().remove(ty, model_id))
   }

   async fn delete_model_ids(&self, ty: ReplicableType, model_ids: &[ModelId]) -> Result<usize> {
      let mut inner = self.inner.write();
      Ok(model_ids
         .iter()
         .filter(|&&model_id| inner.remove(ty, model_id))
         .count())
   }

   async fn model_ids_after(
      &self,
      ty: ReplicableType,
      after: ModelId,
      limit: usize,
   ) -> Result<Vec<ModelId>> {
      let inner = self.inner.read();
      Ok(inner
         .model_ids(ty, Bound::Excluded(after), Bound::Unbounded)
         .take(limit)
         .collect())
   }

   async fn model_ids_in_range(
      &self,
      ty: ReplicableType,
      range: RangeInclusive<ModelId>,
   ) -> Result<Vec<ModelId>> {
      if range.is_empty() {
         return Ok(Vec::new());
      }
      let inner = self.inner.read();
      let (start, end) = range.into_inner();
      Ok(inner
         .model_ids(ty, Bound::Included(start), Bound::Included(end))
         .collect())
   }

   async fn transition_batch(
      &self,
      ty: ReplicableType,
      after_id: RegistryId,
      limit: usize,
      f: &Transition<'_>,
   ) -> Result<BatchScan> {
      let mut inner = self.inner.write();
      let ids: Vec<RegistryId> = inner
         .rows_after(ty, after_id)
         .take(limit)
         .map(|row| row.id)
         .collect();

      let mut scan = BatchScan { scanned: ids.len(), last_id: ids.last().copied(), ..BatchScan::default() };
      for id in ids {
         if let Some(row) = inner.rows.get_mut(&id)
            && f(row)
         {
            scan.updated += 1;
         }
      }
      Ok(scan)
   }

   async fn count_after(
      &self,
      ty: ReplicableType,
      after_id: RegistryId,
      limit: usize,
      filter: &RegistryFilter<'_>,
   ) -> Result<usize> {
      let inner = self.inner.read();
      Ok(inner
         .rows_after(ty, after_id)
         .filter(|row| filter(row))
         .take(limit)
         .count())
   }

   async fn scan(
      &self,
      ty: ReplicableType,
      after_id: RegistryId,
      limit: usize,
   ) -> Result<Vec<Registry>> {
      let inner = self.inner.read();
      Ok(inner.rows_after(ty, after_id).take(limit).cloned().collect())
   }

   async fn select(
      &self,
      ty: ReplicableType,
      filter: &RegistryFilter<'_>,
   ) -> Result<Vec<Registry>> {
      let inner = self.inner.read();
      Ok(inner
         .rows_after(ty, 0)
         .filter(|row| filter(row))
         .cloned()
         .collect())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::registry::SyncState;

   const TY: ReplicableType = ReplicableType::Upload;

   #[tokio::test]
   async fn find_or_initialize_creates_once() {
      let store = MemoryRegistryStore::new();
      let now = Utc::now();
      let (first, created) = store.find_or_initialize(TY, 7, now).await.expect("init");
      assert!(created);
      let (second, created) = store.find_or_initialize(TY, 7, now).await.expect("find");
      assert!(!created);
      assert_eq!(first.id, second.id);
      assert_eq!(store.len(), 1);
   }

   #[tokio::test]
   async fn failed_update_is_not_committed() {
      let store = MemoryRegistryStore::new();
      store.insert_pending(TY, &[1], Utc::now()).await.expect("insert");
      let err = store
         .update(TY, 1, &|row: &mut Registry| {
            row.retry_count = 99;
            row.mark_synced(Utc::now(), false)
         })
         .await;
      assert!(err.is_err());
      let row = store.find(TY, 1).await.expect("find").expect("row");
      assert_eq!(row.retry_count, 0);
      assert_eq!(row.state, SyncState::Pending);
   }

   #[tokio::test]
   async fn update_of_missing_row_reports_not_found() {
      let store = MemoryRegistryStore::new();
      let err = store
         .update(TY, 404, &|_: &mut Registry| Ok(()))
         .await
         .expect_err("missing");
      assert!(matches!(err, Error::RegistryNotFound { model_id: 404, .. }));
   }

   #[tokio::test]
   async fn model_id_queries_are_scoped_by_type() {
      let store = MemoryRegistryStore::new();
      let now = Utc::now();
      store.insert_pending(TY, &[5, 1, 3], now).await.expect("insert");
      store
         .insert_pending(ReplicableType::Wiki, &[2, 4], now)
         .await
         .expect("insert");

      assert_eq!(store.model_ids_after(TY, 0, 10).await.expect("after"), vec![1, 3, 5]);
      assert_eq!(store.model_ids_after(TY, 3, 10).await.expect("after"), vec![5]);
      assert_eq!(store.model_ids_in_range(TY, 2..=5).await.expect("range"), vec![3, 5]);
      assert_eq!(store.model_ids_after(TY, u64::MAX, 10).await.expect("end"), Vec::<u64>::new());
   }

   #[tokio::test]
   async fn persists_and_reloads() {
      let dir = tempfile::tempdir().expect("tempdir");
      let path = dir.path().join("registries.json");
      let store = MemoryRegistryStore::open(&path).expect("open");
      store.insert_pending(TY, &[10, 20], Utc::now()).await.expect("insert");
      store.persist().expect("persist");

      let reloaded = MemoryRegistryStore::open(&path).expect("reopen");
      assert_eq!(reloaded.len(), 2);
      reloaded.insert_pending(TY, &[30], Utc::now()).await.expect("insert");
      let ids: Vec<_> = reloaded.all().into_iter().map(|row| row.id).collect();
      assert_eq!(ids, vec![1, 2, 3]);
   }
}
