//! Registry rows and their sync and verification state machines.
//!
//! A registry row is the secondary-side bookkeeping for exactly one
//! replicable object. Every mutation of a row goes through one of the
//! methods below; stores apply them atomically per row through
//! [`RegistryStore::update`].

mod memory;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryRegistryStore;
pub use store::{BatchScan, Mutation, RegistryFilter, RegistryStore, Transition};

use crate::{
   Result,
   backoff::RetryPolicy,
   error::Error,
   types::{ModelId, RegistryId, ReplicableType, capitalize},
};

/// Sync lifecycle of a registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
   #[default]
   Pending,
   Started,
   Synced,
   Failed,
}

impl SyncState {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Pending => "pending",
         Self::Started => "started",
         Self::Synced => "synced",
         Self::Failed => "failed",
      }
   }
}

/// Checksum lifecycle of a registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
   #[default]
   VerificationPending,
   VerificationStarted,
   VerificationSucceeded,
   VerificationFailed,
   VerificationDisabled,
}

impl VerificationState {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::VerificationPending => "verification_pending",
         Self::VerificationStarted => "verification_started",
         Self::VerificationSucceeded => "verification_succeeded",
         Self::VerificationFailed => "verification_failed",
         Self::VerificationDisabled => "verification_disabled",
      }
   }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
   pub id:                               RegistryId,
   pub replicable_type:                  ReplicableType,
   pub model_id:                         ModelId,
   pub state:                            SyncState,
   pub retry_count:                      u32,
   pub retry_at:                         Option<DateTime<Utc>>,
   pub last_synced_at:                   Option<DateTime<Utc>>,
   pub last_successful_sync_at:          Option<DateTime<Utc>>,
   pub last_sync_failure:                Option<String>,
   pub missing_on_primary:               bool,
   pub force_to_redownload:              bool,
   pub verification_state:               VerificationState,
   pub verification_checksum:            Option<String>,
   pub verification_checksum_mismatched: Option<String>,
   pub verification_retry_count:         u32,
   pub verification_retry_at:            Option<DateTime<Utc>>,
   pub verification_started_at:          Option<DateTime<Utc>>,
   pub verified_at:                      Option<DateTime<Utc>>,
   pub last_verification_failure:        Option<String>,
   /// Successful syncs since the last gc of the local copy.
   #[serde(default)]
   pub syncs_since_gc:                   u64,
   pub created_at:                       DateTime<Utc>,
}

const SYNC: &str = "sync";
const VERIFICATION: &str = "verification";

impl Registry {
   /// A fresh row: sync pending, verification pending.
   pub const fn new(
      id: RegistryId,
      replicable_type: ReplicableType,
      model_id: ModelId,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         replicable_type,
         model_id,
         state: SyncState::Pending,
         retry_count: 0,
         retry_at: None,
         last_synced_at: None,
         last_successful_sync_at: None,
         last_sync_failure: None,
         missing_on_primary: false,
         force_to_redownload: false,
         verification_state: VerificationState::VerificationPending,
         verification_checksum: None,
         verification_checksum_mismatched: None,
         verification_retry_count: 0,
         verification_retry_at: None,
         verification_started_at: None,
         verified_at: None,
         last_verification_failure: None,
         syncs_since_gc: 0,
         created_at: now,
      }
   }

   fn invalid_sync(&self, to: SyncState) -> Error {
      Error::InvalidTransition { machine: SYNC, from: self.state.as_str(), to: to.as_str() }
   }

   fn invalid_verification(&self, to: VerificationState) -> Error {
      Error::InvalidTransition {
         machine: VERIFICATION,
         from:    self.verification_state.as_str(),
         to:      to.as_str(),
      }
   }

   // Sync state machine

   /// pending | failed → started. A `started` row is also accepted: it means
   /// a previous worker died mid-sync and its lease has since expired.
   pub fn mark_started(&mut self, now: DateTime<Utc>) -> Result<()> {
      if self.state == SyncState::Synced {
         return Err(self.invalid_sync(SyncState::Started));
      }
      self.state = SyncState::Started;
      self.last_synced_at = Some(now);
      Ok(())
   }

   /// started → synced.
   ///
   /// New content invalidates any earlier verification, so the verification
   /// fields are reset as well.
   pub fn mark_synced(&mut self, now: DateTime<Utc>, missing_on_primary: bool) -> Result<()> {
      if self.state != SyncState::Started {
         return Err(self.invalid_sync(SyncState::Synced));
      }
      self.state = SyncState::Synced;
      self.retry_count = 0;
      self.retry_at = None;
      self.last_sync_failure = None;
      self.missing_on_primary = missing_on_primary;
      self.force_to_redownload = false;
      self.last_successful_sync_at = Some(now);
      self.reset_verification();
      Ok(())
   }

   /// started → failed, scheduling the next attempt.
   pub fn mark_failed(
      &mut self,
      now: DateTime<Utc>,
      reason: &str,
      missing_on_primary: bool,
      policy: &RetryPolicy,
   ) -> Result<()> {
      if self.state != SyncState::Started {
         return Err(self.invalid_sync(SyncState::Failed));
      }
      self.state = SyncState::Failed;
      self.retry_count = self.retry_count.saturating_add(1);
      self.last_sync_failure = Some(reason.to_string());
      self.missing_on_primary = missing_on_primary;
      self.retry_at = Some(policy.next_retry_at(now, self.retry_count, missing_on_primary));
      Ok(())
   }

   /// any → pending; retry bookkeeping is left untouched.
   pub fn mark_pending(&mut self) {
      self.state = SyncState::Pending;
   }

   /// Bulk resync: pending, and forget when the last attempt started.
   pub fn flag_for_resync(&mut self) {
      self.mark_pending();
      self.last_synced_at = None;
   }

   /// Admin resync: pending and eligible right away.
   pub fn request_resync(&mut self) {
      self.mark_pending();
      self.retry_at = None;
   }

   /// Forces the next sync to discard the local copy.
   pub fn request_redownload(&mut self) {
      self.force_to_redownload = true;
      self.mark_pending();
   }

   /// Whether a sync attempt may run at `now`.
   pub fn sync_due(&self, now: DateTime<Utc>) -> bool {
      self.state != SyncState::Synced && self.retry_at.is_none_or(|at| at <= now)
   }

   /// Whether the next attempt should discard the local copy.
   ///
   /// Repeated incremental failures alternate with full redownloads once the
   /// retry count passes the threshold.
   pub const fn should_be_redownloaded(&self, retries_before_redownload: u32) -> bool {
      self.force_to_redownload
         || (self.retry_count > retries_before_redownload && self.retry_count % 2 == 1)
   }

   /// True until the first successful sync.
   pub const fn never_synced(&self) -> bool {
      self.last_successful_sync_at.is_none()
   }

   // Verification state machine

   pub const fn verification_disabled(&self) -> bool {
      matches!(self.verification_state, VerificationState::VerificationDisabled)
   }

   /// pending | failed | succeeded → started.
   pub fn verification_started(&mut self, now: DateTime<Utc>) -> Result<()> {
      match self.verification_state {
         VerificationState::VerificationStarted | VerificationState::VerificationDisabled => {
            Err(self.invalid_verification(VerificationState::VerificationStarted))
         },
         _ => {
            self.verification_state = VerificationState::VerificationStarted;
            self.verification_started_at = Some(now);
            Ok(())
         },
      }
   }

   /// started → succeeded with the matching checksum.
   pub fn verification_succeeded(&mut self, now: DateTime<Utc>, checksum: &str) -> Result<()> {
      if self.verification_state != VerificationState::VerificationStarted {
         return Err(self.invalid_verification(VerificationState::VerificationSucceeded));
      }
      self.verification_state = VerificationState::VerificationSucceeded;
      self.verification_checksum = Some(checksum.to_string());
      self.verification_checksum_mismatched = None;
      self.last_verification_failure = None;
      self.verification_retry_count = 0;
      self.verification_retry_at = None;
      self.verified_at = Some(now);
      Ok(())
   }

   /// started → failed because the local copy disagrees with the primary.
   ///
   /// The last matching checksum is preserved; the sync state goes back to
   /// pending because the data itself is known to be wrong.
   pub fn verification_mismatched(
      &mut self,
      now: DateTime<Utc>,
      local_checksum: &str,
      policy: &RetryPolicy,
   ) -> Result<()> {
      let failure = format!("{} checksum mismatch", capitalize(self.replicable_type.human_name()));
      self.verification_failed_with(now, failure, policy)?;
      self.verification_checksum_mismatched = Some(local_checksum.to_string());
      self.mark_pending();
      Ok(())
   }

   /// started → failed because the checksum could not be computed.
   pub fn verification_errored(&mut self, now: DateTime<Utc>, policy: &RetryPolicy) -> Result<()> {
      let failure = format!("Error calculating {} checksum", self.replicable_type.human_name());
      self.verification_failed_with(now, failure, policy)
   }

   /// started → failed because the attempt outlived `timeout`.
   pub fn verification_timed_out(
      &mut self,
      now: DateTime<Utc>,
      timeout: std::time::Duration,
      policy: &RetryPolicy,
   ) -> Result<()> {
      let failure = format!("Verification timed out after {}s", timeout.as_secs());
      self.verification_retry_count = 0;
      self.verification_failed_with(now, failure, policy)
   }

   fn verification_failed_with(
      &mut self,
      now: DateTime<Utc>,
      failure: String,
      policy: &RetryPolicy,
   ) -> Result<()> {
      if self.verification_state != VerificationState::VerificationStarted {
         return Err(self.invalid_verification(VerificationState::VerificationFailed));
      }
      self.verification_state = VerificationState::VerificationFailed;
      self.last_verification_failure = Some(failure);
      self.verification_retry_count = self.verification_retry_count.saturating_add(1);
      self.verification_retry_at =
         Some(policy.next_retry_at(now, self.verification_retry_count, false));
      self.verified_at = Some(now);
      Ok(())
   }

   /// Back to pending so the next verification run recomputes the checksum.
   /// No-op while verification is disabled.
   pub fn reset_verification(&mut self) {
      if self.verification_disabled() {
         return;
      }
      self.verification_state = VerificationState::VerificationPending;
      self.verification_checksum = None;
      self.verification_checksum_mismatched = None;
      self.last_verification_failure = None;
      self.verification_retry_count = 0;
      self.verification_retry_at = None;
   }

   pub fn disable_verification(&mut self) {
      self.verification_state = VerificationState::VerificationDisabled;
      self.verification_started_at = None;
   }

   pub fn enable_verification(&mut self) {
      if self.verification_disabled() {
         self.verification_state = VerificationState::VerificationPending;
         self.reset_verification();
      }
   }

   /// Verification retry is due at `now`.
   pub fn verification_retry_due(&self, now: DateTime<Utc>) -> bool {
      self.verification_retry_at.is_none_or(|at| at <= now)
   }

   /// Synced and waiting for a first or retried verification.
   pub fn needs_verification(&self, now: DateTime<Utc>) -> bool {
      if self.state != SyncState::Synced {
         return false;
      }
      match self.verification_state {
         VerificationState::VerificationPending => true,
         VerificationState::VerificationFailed => self.verification_retry_due(now),
         _ => false,
      }
   }

   pub const fn checksum_mismatch(&self) -> bool {
      self.verification_checksum_mismatched.is_some()
   }
}
