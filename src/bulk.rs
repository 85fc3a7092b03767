//! Cursor-driven mass state transitions ("resync all", "reverify all").
//!
//! Rows are walked in registry id order, one batch per call. The id of the
//! last row processed is persisted so an interrupted sweep resumes where it
//! stopped. Each row is transitioned atomically on its own; rows updated by
//! other workers mid-sweep are simply seen in their new state.

use std::{marker::PhantomData, sync::Arc};

use crate::{
   Result,
   config::Config,
   cursor::CursorStore,
   registry::{Registry, RegistryStore, SyncState, VerificationState},
   types::ReplicableType,
};

/// A state change applied to every eligible row.
pub trait BulkTransition: Send + Sync + 'static {
   /// Short name used in cursor keys and logs.
   const NAME: &'static str;

   fn needs_update(registry: &Registry) -> bool;

   fn apply(registry: &mut Registry);
}

/// Every row not already pending goes back to pending.
pub struct MarkPending;

impl BulkTransition for MarkPending {
   const NAME: &'static str = "mark_pending";

   fn needs_update(registry: &Registry) -> bool {
      registry.state != SyncState::Pending
   }

   fn apply(registry: &mut Registry) {
      registry.flag_for_resync();
   }
}

/// Every verified, failed or in-flight verification goes back to pending.
pub struct MarkVerificationPending;

impl BulkTransition for MarkVerificationPending {
   const NAME: &'static str = "mark_verification_pending";

   fn needs_update(registry: &Registry) -> bool {
      matches!(
         registry.verification_state,
         VerificationState::VerificationSucceeded
            | VerificationState::VerificationFailed
            | VerificationState::VerificationStarted
      )
   }

   fn apply(registry: &mut Registry) {
      registry.reset_verification();
   }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
   pub scanned: usize,
   pub updated: usize,
   /// The sweep reached the end and the cursor was cleared.
   pub done:    bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkRunReport {
   pub batches: usize,
   pub updated: usize,
   pub done:    bool,
}

pub struct BulkUpdateService<T: BulkTransition> {
   replicable_type: ReplicableType,
   registries:      Arc<dyn RegistryStore>,
   cursors:         Arc<dyn CursorStore>,
   batch_size:      usize,
   _transition:     PhantomData<T>,
}

impl<T: BulkTransition> BulkUpdateService<T> {
   pub fn new(
      replicable_type: ReplicableType,
      registries: Arc<dyn RegistryStore>,
      cursors: Arc<dyn CursorStore>,
      cfg: &Config,
   ) -> Self {
      Self {
         replicable_type,
         registries,
         cursors,
         batch_size: cfg.effective_bulk_update_batch_size(),
         _transition: PhantomData,
      }
   }

   pub fn with_batch_size(mut self, batch_size: usize) -> Self {
      self.batch_size = batch_size.max(1);
      self
   }

   /// `geo:bulk_update:<transition>:<type>`
   pub fn cursor_key(&self) -> String {
      format!("geo:bulk_update:{}:{}", T::NAME, self.replicable_type)
   }

   /// Id of the last registry processed; zero before the first batch.
   pub async fn cursor(&self) -> Result<u64> {
      self.cursors.get(&self.cursor_key()).await
   }

   pub async fn set_cursor(&self, value: u64) -> Result<()> {
      self.cursors.set(&self.cursor_key(), value).await
   }

   pub async fn reset_cursor(&self) -> Result<()> {
      self.cursors.clear(&self.cursor_key()).await
   }

   pub async fn run_one_batch(&self) -> Result<BatchOutcome> {
      let cursor = self.cursor().await?;
      let scan = self
         .registries
         .transition_batch(self.replicable_type, cursor, self.batch_size, &|r: &mut Registry| {
            if T::needs_update(r) {
               T::apply(r);
               true
            } else {
               false
            }
         })
         .await?;

      let done = scan.scanned < self.batch_size;
      match scan.last_id {
         Some(last_id) if !done => self.set_cursor(last_id).await?,
         _ => self.reset_cursor().await?,
      }

      tracing::debug!(
         transition = T::NAME,
         replicable_type = %self.replicable_type,
         cursor,
         scanned = scan.scanned,
         updated = scan.updated,
         done,
         "bulk update batch"
      );
      Ok(BatchOutcome { scanned: scan.scanned, updated: scan.updated, done })
   }

   /// Estimated batches left from the current cursor, capped at `max_batch_count`.
   pub async fn remaining_batches(&self, max_batch_count: usize) -> Result<usize> {
      let cursor = self.cursor().await?;
      let limit = max_batch_count.saturating_mul(self.batch_size);
      let rows = self
         .registries
         .count_after(self.replicable_type, cursor, limit, &|_: &Registry| true)
         .await?;
      Ok(rows.div_ceil(self.batch_size).min(max_batch_count))
   }

   /// Runs batches until the sweep finishes or `max_batches` have run.
   pub async fn run(&self, max_batches: usize) -> Result<BulkRunReport> {
      let mut report = BulkRunReport::default();
      while report.batches < max_batches {
         let batch = self.run_one_batch().await?;
         report.batches += 1;
         report.updated += batch.updated;
         if batch.done {
            report.done = true;
            break;
         }
      }
      tracing::info!(
         transition = T::NAME,
         replicable_type = %self.replicable_type,
         batches = report.batches,
         updated = report.updated,
         done = report.done,
         "bulk update run"
      );
      Ok(report)
   }
}
