//! Checksum verification of synced objects.
//!
//! A synced object is verified by computing the checksum of the local copy
//! and comparing it with the checksum the primary recorded. A mismatch marks
//! the object for resync; a computation error is retried without a resync.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};

use crate::{
   Result,
   backoff::RetryPolicy,
   checksum::ChecksumProvider,
   clock::{Clock, SystemClock},
   config::Config,
   error::Error,
   registry::{Registry, RegistryStore, SyncState, VerificationState},
   replicable::ReplicableModels,
   types::{ModelId, ReplicableType},
   updates::{MemoryUpdateLog, UpdateLog},
};

/// Why a verification did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
   Disabled,
   NotSynced,
   ResyncPending,
   InProgress,
   NoPrimaryChecksum,
   AlreadyVerified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
   Skipped(SkipReason),
   Succeeded { checksum: String },
   Mismatch { primary: String, local: String },
   Errored { reason: String },
}

/// Tally of one [`VerificationService::verify_batch`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationBatch {
   pub succeeded:  usize,
   pub mismatched: usize,
   pub errored:    usize,
   pub skipped:    usize,
   /// Rows that could not be processed at all (store errors).
   pub failed:     usize,
}

impl VerificationBatch {
   pub const fn total(&self) -> usize {
      self.succeeded + self.mismatched + self.errored + self.skipped + self.failed
   }
}

pub struct VerificationService {
   replicable_type:         ReplicableType,
   registries:              Arc<dyn RegistryStore>,
   replicables:             Arc<dyn ReplicableModels>,
   checksums:               Arc<dyn ChecksumProvider>,
   updates:                 Arc<dyn UpdateLog>,
   clock:                   Arc<dyn Clock>,
   policy:                  RetryPolicy,
   batch_size:              usize,
   reverification_batch:    usize,
   timeout:                 Duration,
   reverification_interval: Duration,
}

impl VerificationService {
   pub fn new(
      replicable_type: ReplicableType,
      registries: Arc<dyn RegistryStore>,
      replicables: Arc<dyn ReplicableModels>,
      checksums: Arc<dyn ChecksumProvider>,
      cfg: &Config,
   ) -> Self {
      Self {
         replicable_type,
         registries,
         replicables,
         checksums,
         updates: Arc::new(MemoryUpdateLog::new()),
         clock: Arc::new(SystemClock),
         policy: RetryPolicy::from_config(cfg),
         batch_size: cfg.effective_verification_batch_size(),
         reverification_batch: cfg.effective_reverification_batch_size(),
         timeout: cfg.verification_timeout(),
         reverification_interval: cfg.minimum_reverification_interval(),
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

   /// Verifies one object.
   pub async fn verify(&self, model_id: ModelId) -> Result<VerificationOutcome> {
      let ty = self.replicable_type;
      let row = self
         .registries
         .find(ty, model_id)
         .await?
         .ok_or(Error::RegistryNotFound { replicable_type: ty, model_id })?;

      if let Some(reason) = self.skip_reason(&row).await? {
         tracing::debug!(replicable_type = %ty, model_id, ?reason, "verification skipped");
         return Ok(VerificationOutcome::Skipped(reason));
      }
      let Some(primary) = self.replicables.primary_checksum(ty, model_id).await? else {
         return Ok(VerificationOutcome::Skipped(SkipReason::NoPrimaryChecksum));
      };
      if row.verification_state == VerificationState::VerificationSucceeded
         && row.verification_checksum.as_deref() == Some(primary.as_str())
      {
         return Ok(VerificationOutcome::Skipped(SkipReason::AlreadyVerified));
      }

      let now = self.clock.now();
      self
         .registries
         .update(ty, model_id, &|r: &mut Registry| r.verification_started(now))
         .await?;

      let policy = self.policy;
      let outcome = match self.checksums.checksum(ty, model_id).await {
         Ok(local) if local == primary => {
            self
               .registries
               .update(ty, model_id, &|r: &mut Registry| r.verification_succeeded(now, &local))
               .await?;
            VerificationOutcome::Succeeded { checksum: local }
         },
         Ok(local) => {
            self
               .registries
               .update(ty, model_id, &|r: &mut Registry| {
                  r.verification_mismatched(now, &local, &policy)
               })
               .await?;
            tracing::warn!(
               replicable_type = %ty,
               model_id,
               primary = %primary,
               local = %local,
               "checksum mismatch, flagged for resync"
            );
            VerificationOutcome::Mismatch { primary, local }
         },
         Err(e) => {
            self
               .registries
               .update(ty, model_id, &|r: &mut Registry| r.verification_errored(now, &policy))
               .await?;
            tracing::warn!(replicable_type = %ty, model_id, "checksum calculation failed: {e}");
            VerificationOutcome::Errored { reason: e.to_string() }
         },
      };
      Ok(outcome)
   }

   async fn skip_reason(&self, row: &Registry) -> Result<Option<SkipReason>> {
      if row.verification_disabled() {
         return Ok(Some(SkipReason::Disabled));
      }
      match row.state {
         SyncState::Synced => {},
         SyncState::Pending => return Ok(Some(SkipReason::ResyncPending)),
         SyncState::Started | SyncState::Failed => return Ok(Some(SkipReason::NotSynced)),
      }
      if let Some(since) = row.last_synced_at
         && self
            .updates
            .updated_since(row.replicable_type, row.model_id, since)
            .await?
      {
         return Ok(Some(SkipReason::ResyncPending));
      }
      if row.verification_state == VerificationState::VerificationStarted {
         return Ok(Some(SkipReason::InProgress));
      }
      Ok(None)
   }

   async fn candidates(&self, now: DateTime<Utc>) -> Result<Vec<Registry>> {
      let mut rows = self
         .registries
         .select(self.replicable_type, &move |r: &Registry| r.needs_verification(now))
         .await?;
      // Never-verified rows first, then the longest since verification.
      rows.sort_by_key(|r| (r.verified_at, r.id));
      Ok(rows)
   }

   /// Verifies the next batch of rows that need it. Per-row failures are
   /// logged and counted.
   pub async fn verify_batch(&self) -> Result<VerificationBatch> {
      let mut rows = self.candidates(self.clock.now()).await?;
      rows.truncate(self.batch_size);

      let mut batch = VerificationBatch::default();
      for row in rows {
         match self.verify(row.model_id).await {
            Ok(VerificationOutcome::Succeeded { .. }) => batch.succeeded += 1,
            Ok(VerificationOutcome::Mismatch { .. }) => batch.mismatched += 1,
            Ok(VerificationOutcome::Errored { .. }) => batch.errored += 1,
            Ok(VerificationOutcome::Skipped(_)) => batch.skipped += 1,
            Err(e) => {
               tracing::warn!(
                  replicable_type = %self.replicable_type,
                  model_id = row.model_id,
                  "verification failed: {e}"
               );
               batch.failed += 1;
            },
         }
      }

      if batch.total() > 0 {
         tracing::info!(
            replicable_type = %self.replicable_type,
            succeeded = batch.succeeded,
            mismatched = batch.mismatched,
            errored = batch.errored,
            skipped = batch.skipped,
            failed = batch.failed,
            "verification batch finished"
         );
      }
      Ok(batch)
   }

   /// Fails rows stuck in `verification_started` longer than the timeout.
   pub async fn fail_verification_timeouts(&self) -> Result<usize> {
      let now = self.clock.now();
      let cutoff = older_than(now, self.timeout);
      let stuck = self
         .registries
         .select(self.replicable_type, &move |r: &Registry| {
            r.verification_state == VerificationState::VerificationStarted
               && r.verification_started_at.is_none_or(|at| at < cutoff)
         })
         .await?;

      let policy = self.policy;
      let timeout = self.timeout;
      let mut failed = 0;
      for row in stuck {
         match self
            .registries
            .update(self.replicable_type, row.model_id, &|r: &mut Registry| {
               r.verification_timed_out(now, timeout, &policy)
            })
            .await
         {
            Ok(_) => failed += 1,
            Err(e) => tracing::warn!(model_id = row.model_id, "could not time out verification: {e}"),
         }
      }
      Ok(failed)
   }

   /// Sends rows verified longer ago than the reverification interval back to
   /// `verification_pending`.
   pub async fn reverify_batch(&self) -> Result<usize> {
      let now = self.clock.now();
      let cutoff = older_than(now, self.reverification_interval);
      let mut due = self
         .registries
         .select(self.replicable_type, &move |r: &Registry| {
            r.verification_state == VerificationState::VerificationSucceeded
               && r.verified_at.is_some_and(|at| at < cutoff)
         })
         .await?;
      due.sort_by_key(|r| (r.verified_at, r.id));
      due.truncate(self.reverification_batch);

      let mut reset = 0;
      for row in due {
         match self
            .registries
            .update(self.replicable_type, row.model_id, &|r: &mut Registry| {
               r.reset_verification();
               Ok(())
            })
            .await
         {
            Ok(_) => reset += 1,
            Err(e) => tracing::warn!(model_id = row.model_id, "could not queue reverification: {e}"),
         }
      }
      if reset > 0 {
         tracing::info!(replicable_type = %self.replicable_type, reset, "reverification queued");
      }
      Ok(reset)
   }

   /// Number of [`Self::verify_batch`] runs needed to drain the current
   /// backlog, capped at `max_batch_count`.
   pub async fn remaining_verification_batch_count(&self, max_batch_count: usize) -> Result<usize> {
      let pending = self.candidates(self.clock.now()).await?.len();
      Ok(pending.div_ceil(self.batch_size).min(max_batch_count))
   }
}

fn older_than(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
   TimeDelta::from_std(age)
      .ok()
      .and_then(|delta| now.checked_sub_signed(delta))
      .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
