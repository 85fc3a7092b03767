//! Keeps registry rows in one-to-one correspondence with replicable objects.
//!
//! Each call changes at most one bounded window on each side. The "missing"
//! pass walks replicable ids and creates rows for ids with no registry; the
//! "unused" pass walks registry model ids and deletes rows whose object is
//! gone. Both passes compare two sorted id sequences over the same id range,
//! so no per-row lookups are needed. Windows without differences are skipped
//! within the same call, so a call that changes nothing means every id was
//! looked at. Window positions persist between calls and wrap around at the
//! end.

use std::sync::Arc;

use crate::{
   Result,
   clock::{Clock, SystemClock},
   config::Config,
   cursor::CursorStore,
   registry::RegistryStore,
   replicable::ReplicableModels,
   types::{ModelId, ReplicableType},
};

/// Elements of `left` that are not in `right`. Both must be sorted ascending.
pub fn sorted_difference(left: &[ModelId], right: &[ModelId]) -> Vec<ModelId> {
   let mut out = Vec::new();
   let mut right = right.iter().peekable();
   for &id in left {
      while right.next_if(|&&other| other < id).is_some() {}
      if right.peek() != Some(&&id) {
         out.push(id);
      }
   }
   out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
   pub created: usize,
   pub deleted: usize,
}

impl ConsistencyReport {
   pub const fn did_work(&self) -> bool {
      self.created > 0 || self.deleted > 0
   }
}

pub struct RegistryConsistencyService {
   replicable_type: ReplicableType,
   registries:      Arc<dyn RegistryStore>,
   replicables:     Arc<dyn ReplicableModels>,
   cursors:         Arc<dyn CursorStore>,
   clock:           Arc<dyn Clock>,
   batch_size:      usize,
}

impl RegistryConsistencyService {
   pub fn new(
      replicable_type: ReplicableType,
      registries: Arc<dyn RegistryStore>,
      replicables: Arc<dyn ReplicableModels>,
      cursors: Arc<dyn CursorStore>,
      cfg: &Config,
   ) -> Self {
      Self {
         replicable_type,
         registries,
         replicables,
         cursors,
         clock: Arc::new(SystemClock),
         batch_size: cfg.effective_consistency_batch_size(),
      }
   }

   pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
      self.clock = clock;
      self
   }

   pub fn with_batch_size(mut self, batch_size: usize) -> Self {
      self.batch_size = batch_size.max(1);
      self
   }

   fn models_cursor_key(&self) -> String {
      format!("registry_consistency:{}:models", self.replicable_type)
   }

   fn registries_cursor_key(&self) -> String {
      format!("registry_consistency:{}:registries", self.replicable_type)
   }

   /// Runs one pass; returns whether anything was created or deleted. `false`
   /// means registries and replicables match.
   pub async fn execute(&self) -> Result<bool> {
      Ok(self.reconcile().await?.did_work())
   }

   pub async fn reconcile(&self) -> Result<ConsistencyReport> {
      let report = ConsistencyReport {
         created: self.create_missing().await?,
         deleted: self.delete_unused().await?,
      };
      if report.did_work() {
         tracing::info!(
            replicable_type = %self.replicable_type,
            created = report.created,
            deleted = report.deleted,
            "registry consistency pass"
         );
      }
      Ok(report)
   }

   async fn create_missing(&self) -> Result<usize> {
      let ty = self.replicable_type;
      let key = self.models_cursor_key();
      self
         .sweep(
            &key,
            move |after, limit| self.replicables.ids_after(ty, after, limit),
            move |ids| async move {
               let (first, last) = (ids[0], ids[ids.len() - 1]);
               let registered = self.registries.model_ids_in_range(ty, first..=last).await?;
               let missing = sorted_difference(&ids, &registered);
               if missing.is_empty() {
                  return Ok(0);
               }
               let created = self
                  .registries
                  .insert_pending(ty, &missing, self.clock.now())
                  .await?;
               tracing::debug!(
                  replicable_type = %ty,
                  first,
                  last,
                  created,
                  "created missing registries"
               );
               Ok(created)
            },
         )
         .await
   }

   async fn delete_unused(&self) -> Result<usize> {
      let ty = self.replicable_type;
      let key = self.registries_cursor_key();
      self
         .sweep(
            &key,
            move |after, limit| self.registries.model_ids_after(ty, after, limit),
            move |ids| async move {
               let (first, last) = (ids[0], ids[ids.len() - 1]);
               let existing = self.replicables.ids_in_range(ty, first..=last).await?;
               let unused = sorted_difference(&ids, &existing);
               if unused.is_empty() {
                  return Ok(0);
               }
               let deleted = self.registries.delete_model_ids(ty, &unused).await?;
               tracing::debug!(
                  replicable_type = %ty,
                  first,
                  last,
                  deleted,
                  "deleted unused registries"
               );
               Ok(deleted)
            },
         )
         .await
   }

   /// Walks windows from the stored cursor, applying `apply` to each
   /// non-empty one, and stops at the first window that changed something.
   /// Windows without differences are skipped until the walk has covered
   /// every id once, wrapping to the start at the end. The cursor is left
   /// after the last window looked at; a short window resets it.
   async fn sweep<F, FFut, A, AFut>(&self, key: &str, fetch: F, apply: A) -> Result<usize>
   where
      F: Fn(ModelId, usize) -> FFut,
      FFut: Future<Output = Result<Vec<ModelId>>>,
      A: Fn(Vec<ModelId>) -> AFut,
      AFut: Future<Output = Result<usize>>,
   {
      let origin = self.cursors.get(key).await?;
      let mut cursor = origin;
      let mut wrapped = false;
      loop {
         let ids = fetch(cursor, self.batch_size).await?;
         let next = match ids.last() {
            Some(&last) if ids.len() >= self.batch_size => last,
            _ => 0,
         };
         if next == 0 {
            self.cursors.clear(key).await?;
         } else {
            self.cursors.set(key, next).await?;
         }

         if !ids.is_empty() {
            let changed = apply(ids).await?;
            if changed > 0 {
               return Ok(changed);
            }
         }

         if next == 0 {
            if origin == 0 || wrapped {
               return Ok(0);
            }
            wrapped = true;
         } else if wrapped && next >= origin {
            return Ok(0);
         }
         cursor = next;
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn difference_of_sorted_sequences() {
      assert_eq!(sorted_difference(&[1, 2, 3, 5, 8], &[2, 3, 4, 8]), vec![1, 5]);
      assert_eq!(sorted_difference(&[1, 2], &[]), vec![1, 2]);
      assert_eq!(sorted_difference(&[], &[1, 2]), Vec::<u64>::new());
      assert_eq!(sorted_difference(&[10, 11], &[1, 2, 3]), vec![10, 11]);
      assert_eq!(sorted_difference(&[1, 2], &[5, 6]), vec![1, 2]);
   }
}
