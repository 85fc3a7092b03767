//! Lease-guarded sync of a single object.

use std::{
   any::Any,
   panic::AssertUnwindSafe,
   sync::Arc,
   time::{Duration, Instant},
};

use futures::FutureExt;
use parking_lot::Mutex;

use crate::{
   Result,
   backoff::RetryPolicy,
   clock::{Clock, SystemClock},
   config::Config,
   housekeeping::{Housekeeping, HousekeepingPeriods, HousekeepingTask},
   lease::{ExclusiveLease, lease_key},
   registry::{Registry, RegistryStore, SyncState},
   scheduler::Scheduler,
   transfer::{Transfer, TransferMode, TransferRequest, TransferResult},
   types::{ModelId, ReplicableType},
   updates::{MemoryUpdateLog, UpdateLog},
};

pub const LEASE_SERVICE: &str = "geo_sync_service";

/// What one [`SyncService::execute`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
   /// Another worker holds the lease.
   LeaseTaken,
   /// The row is synced or still backing off.
   NotDue,
   Synced { bytes: u64, missing_on_primary: bool },
   Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
   pub outcome:     SyncOutcome,
   /// The object changed on the primary, or a resync was requested, during
   /// the transfer and another sync was enqueued.
   pub rescheduled: bool,
}

impl From<SyncOutcome> for SyncReport {
   fn from(outcome: SyncOutcome) -> Self {
      Self { outcome, rescheduled: false }
   }
}

/// Syncs objects of one replicable type, one attempt per call.
pub struct SyncService {
   replicable_type:  ReplicableType,
   registries:       Arc<dyn RegistryStore>,
   lease:            Arc<dyn ExclusiveLease>,
   transfer:         Arc<dyn Transfer>,
   scheduler:        Arc<dyn Scheduler>,
   updates:          Arc<dyn UpdateLog>,
   clock:            Arc<dyn Clock>,
   housekeeping:     Option<Arc<dyn Housekeeping>>,
   periods:          HousekeepingPeriods,
   policy:           RetryPolicy,
   lease_timeout:    Duration,
   redownload_after: u32,
   clone_first_sync: bool,
}

impl SyncService {
   pub fn new(
      replicable_type: ReplicableType,
      registries: Arc<dyn RegistryStore>,
      lease: Arc<dyn ExclusiveLease>,
      transfer: Arc<dyn Transfer>,
      scheduler: Arc<dyn Scheduler>,
      cfg: &Config,
   ) -> Self {
      Self {
         replicable_type,
         registries,
         lease,
         transfer,
         scheduler,
         updates: Arc::new(MemoryUpdateLog::new()),
         clock: Arc::new(SystemClock),
         housekeeping: None,
         periods: HousekeepingPeriods::from_config(cfg),
         policy: RetryPolicy::from_config(cfg),
         lease_timeout: cfg.sync_lease_timeout(),
         redownload_after: cfg.retries_before_redownload,
         clone_first_sync: cfg.use_clone_on_first_sync,
      }
   }

   pub fn with_updates(mut self, updates: Arc<dyn UpdateLog>) -> Self {
      self.updates = updates;
      self
   }

   pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
      self.clock = clock;
      self
   }

   pub fn with_housekeeping(mut self, housekeeping: Arc<dyn Housekeeping>) -> Self {
      self.housekeeping = Some(housekeeping);
      self
   }

   /// Runs one sync attempt for `model_id`.
   ///
   /// Transfer failures, including errors and panics raised by the transfer,
   /// are recorded on the registry. Only lease, store and scheduler failures
   /// are returned as errors.
   pub async fn execute(&self, model_id: ModelId) -> Result<SyncReport> {
      let ty = self.replicable_type;
      let key = lease_key(LEASE_SERVICE, ty, model_id);
      let Some(token) = self.lease.try_obtain(&key, self.lease_timeout).await? else {
         tracing::debug!(replicable_type = %ty, model_id, "sync lease taken, skipping");
         return Ok(SyncOutcome::LeaseTaken.into());
      };

      let attempt = self.sync_locked(model_id).await;
      let released = self.lease.cancel(&key, &token).await;
      let report = attempt?;

      if report.rescheduled {
         tracing::info!(replicable_type = %ty, model_id, "updated during sync, rescheduling");
         self.scheduler.enqueue_sync(ty, model_id).await?;
      }
      released?;
      Ok(report)
   }

   async fn sync_locked(&self, model_id: ModelId) -> Result<SyncReport> {
      let ty = self.replicable_type;
      let started_at = self.clock.now();
      let (registry, _) = self
         .registries
         .find_or_initialize(ty, model_id, started_at)
         .await?;

      if !registry.sync_due(started_at) {
         tracing::debug!(
            replicable_type = %ty,
            model_id,
            state = registry.state.as_str(),
            retry_at = ?registry.retry_at,
            "sync not due"
         );
         return Ok(SyncOutcome::NotDue.into());
      }

      let request = TransferRequest {
         replicable_type: ty,
         model_id,
         mode: self.transfer_mode(&registry),
      };
      self
         .registries
         .update(ty, model_id, &|r: &mut Registry| r.mark_started(started_at))
         .await?;

      let start = Instant::now();
      let result = self.attempt_transfer(&request).await;
      let finished_at = self.clock.now();
      let missing = result.missing_on_primary;

      // A resync requested while the transfer ran puts the row back to
      // pending. The row is left as is and the sync is enqueued again.
      if !result.success {
         let reason = result.reason().to_string();
         let policy = self.policy;
         let row = self
            .registries
            .update(ty, model_id, &|r: &mut Registry| {
               if r.state != SyncState::Started {
                  return Ok(());
               }
               r.mark_failed(finished_at, &reason, missing, &policy)
            })
            .await?;
         tracing::warn!(
            replicable_type = %ty,
            model_id,
            retry_count = row.retry_count,
            missing_on_primary = missing,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "sync failed: {reason}"
         );
         return Ok(SyncReport {
            outcome:     SyncOutcome::Failed { reason },
            rescheduled: row.state == SyncState::Pending,
         });
      }

      let raced = self.updates.updated_since(ty, model_id, started_at).await?;
      let new_object = registry.never_synced();
      let periods = self.periods;
      let committed: Mutex<Option<Option<HousekeepingTask>>> = Mutex::new(None);
      self
         .registries
         .update(ty, model_id, &|r: &mut Registry| {
            if r.state != SyncState::Started {
               return Ok(());
            }
            r.mark_synced(finished_at, missing)?;
            let task = periods.record_sync(r, new_object);
            if raced {
               r.mark_pending();
            }
            *committed.lock() = Some(task);
            Ok(())
         })
         .await?;
      let committed = committed.into_inner();
      tracing::info!(
         replicable_type = %ty,
         model_id,
         mode = ?request.mode,
         bytes = result.bytes_transferred,
         elapsed_secs = start.elapsed().as_secs_f64(),
         resync_requested = committed.is_none(),
         "sync finished"
      );

      if let Some(task) = committed {
         self.housekeep(model_id, task).await;
      }

      Ok(SyncReport {
         outcome:     SyncOutcome::Synced {
            bytes:              result.bytes_transferred,
            missing_on_primary: missing,
         },
         rescheduled: raced || committed.is_none(),
      })
   }

   fn transfer_mode(&self, registry: &Registry) -> TransferMode {
      let wanted = if registry.should_be_redownloaded(self.redownload_after) {
         TransferMode::Redownload
      } else if self.clone_first_sync && registry.never_synced() {
         TransferMode::Clone
      } else {
         TransferMode::Incremental
      };
      if self.transfer.supports(wanted) { wanted } else { TransferMode::Incremental }
   }

   async fn attempt_transfer(&self, request: &TransferRequest) -> TransferResult {
      match AssertUnwindSafe(self.transfer.attempt(request))
         .catch_unwind()
         .await
      {
         Ok(Ok(result)) => result,
         Ok(Err(e)) => {
            tracing::warn!(
               replicable_type = %request.replicable_type,
               model_id = request.model_id,
               "transfer error: {e}"
            );
            TransferResult::failed(e.to_string())
         },
         Err(panic) => TransferResult::failed(format!("transfer panicked: {}", panic_message(&*panic))),
      }
   }

   async fn housekeep(&self, model_id: ModelId, task: Option<HousekeepingTask>) {
      let Some(housekeeping) = &self.housekeeping else {
         return;
      };
      let ty = self.replicable_type;
      if let Err(e) = housekeeping.execute(ty, model_id, task).await {
         tracing::warn!(replicable_type = %ty, model_id, ?task, "housekeeping failed: {e}");
      }
   }

   /// Model ids whose registry may be synced now, in registry id order.
   pub async fn due(&self, limit: usize) -> Result<Vec<ModelId>> {
      let now = self.clock.now();
      let mut rows = self
         .registries
         .select(self.replicable_type, &move |r: &Registry| r.sync_due(now))
         .await?;
      rows.truncate(limit);
      Ok(rows.into_iter().map(|r| r.model_id).collect())
   }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
   panic
      .downcast_ref::<&str>()
      .copied()
      .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
      .unwrap_or("unknown panic")
}
