mod support;

use std::sync::Arc;

use chrono::TimeDelta;
use geosync::{
   clock::Clock,
   registry::{Registry, RegistryStore, SyncState, VerificationState},
   replicable::MemoryReplicables,
   types::{ModelId, ReplicableType},
   updates::UpdateLog,
   verification::{SkipReason, VerificationOutcome, VerificationService},
};
use support::{FixedChecksums, Harness, ScriptedTransfer, t0};

const TY: ReplicableType = ReplicableType::LfsObject;

struct Setup {
   h:           Harness,
   replicables: Arc<MemoryReplicables>,
   checksums:   Arc<FixedChecksums>,
   service:     VerificationService,
}

fn setup() -> Setup {
   let h = Harness::new();
   let replicables = Arc::new(MemoryReplicables::new());
   let checksums = Arc::new(FixedChecksums::default());
   let service = VerificationService::new(
      TY,
      h.registries.clone(),
      replicables.clone(),
      checksums.clone(),
      &h.cfg,
   )
   .with_updates(h.updates.clone())
   .with_clock(h.clock.clone());
   Setup { h, replicables, checksums, service }
}

/// Creates a synced row whose primary checksum is `primary`.
async fn synced(s: &Setup, model_id: ModelId, primary: &str) {
   s.replicables.insert(TY, model_id, Some(primary.to_string()));
   s.h.registries
      .insert_pending(TY, &[model_id], s.h.clock.now())
      .await
      .expect("insert");
   let now = s.h.clock.now();
   s.h.registries
      .update(TY, model_id, &|r: &mut Registry| {
         r.mark_started(now)?;
         r.mark_synced(now, false)
      })
      .await
      .expect("sync");
}

#[tokio::test]
async fn matching_checksum_succeeds() {
   let s = setup();
   synced(&s, 1, "abc").await;
   s.checksums.set(1, "abc");

   let outcome = s.service.verify(1).await.expect("verify");
   assert_eq!(outcome, VerificationOutcome::Succeeded { checksum: "abc".to_string() });
   let row = s.h.registry(TY, 1).await;
   assert_eq!(row.verification_state, VerificationState::VerificationSucceeded);
   assert_eq!(row.verification_checksum.as_deref(), Some("abc"));
   assert_eq!(row.verified_at, Some(t0()));

   let again = s.service.verify(1).await.expect("verify again");
   assert_eq!(again, VerificationOutcome::Skipped(SkipReason::AlreadyVerified));
}

#[tokio::test]
async fn mismatch_fails_verification_and_makes_row_sync_eligible() {
   let s = setup();
   synced(&s, 2, "good").await;
   s.checksums.set(2, "good");
   s.service.verify(2).await.expect("first verify");

   s.replicables.set_checksum(TY, 2, Some("newer".to_string()));
   s.checksums.set(2, "stale");
   let outcome = s.service.verify(2).await.expect("verify");
   assert_eq!(outcome, VerificationOutcome::Mismatch {
      primary: "newer".to_string(),
      local:   "stale".to_string(),
   });

   let row = s.h.registry(TY, 2).await;
   assert_eq!(row.verification_state, VerificationState::VerificationFailed);
   assert_eq!(row.state, SyncState::Pending);
   assert_eq!(row.verification_checksum.as_deref(), Some("good"));
   assert_eq!(row.verification_checksum_mismatched.as_deref(), Some("stale"));
   assert_eq!(row.last_verification_failure.as_deref(), Some("LFS object checksum mismatch"));

   let sync = s.h.sync_service(TY, Arc::new(ScriptedTransfer::succeeding()));
   assert_eq!(sync.due(10).await.expect("due"), vec![2]);
}

#[tokio::test]
async fn checksum_error_retries_without_resync() {
   let s = setup();
   synced(&s, 3, "abc").await;

   let outcome = s.service.verify(3).await.expect("verify");
   assert!(matches!(outcome, VerificationOutcome::Errored { .. }));
   let row = s.h.registry(TY, 3).await;
   assert_eq!(row.verification_state, VerificationState::VerificationFailed);
   assert_eq!(row.state, SyncState::Synced);
   assert_eq!(row.verification_retry_count, 1);
   assert_eq!(row.verification_retry_at, Some(t0() + TimeDelta::seconds(60)));
   assert_eq!(
      row.last_verification_failure.as_deref(),
      Some("Error calculating LFS object checksum")
   );
   assert!(!row.checksum_mismatch());
}

#[tokio::test]
async fn skip_rules() {
   let s = setup();

   s.h.registries.insert_pending(TY, &[10], t0()).await.expect("insert");
   assert_eq!(
      s.service.verify(10).await.expect("pending"),
      VerificationOutcome::Skipped(SkipReason::ResyncPending)
   );

   synced(&s, 11, "x").await;
   s.h.registries
      .update(TY, 11, &|r: &mut Registry| {
         r.disable_verification();
         Ok(())
      })
      .await
      .expect("disable");
   assert_eq!(
      s.service.verify(11).await.expect("disabled"),
      VerificationOutcome::Skipped(SkipReason::Disabled)
   );

   synced(&s, 12, "x").await;
   s.h.updates
      .record(TY, 12, s.h.clock.now() + TimeDelta::seconds(1))
      .await
      .expect("record");
   assert_eq!(
      s.service.verify(12).await.expect("updated"),
      VerificationOutcome::Skipped(SkipReason::ResyncPending)
   );

   synced(&s, 13, "x").await;
   s.replicables.set_checksum(TY, 13, None);
   assert_eq!(
      s.service.verify(13).await.expect("no checksum"),
      VerificationOutcome::Skipped(SkipReason::NoPrimaryChecksum)
   );

   synced(&s, 14, "x").await;
   let now = s.h.clock.now();
   s.h.registries
      .update(TY, 14, &|r: &mut Registry| r.verification_started(now))
      .await
      .expect("start");
   assert_eq!(
      s.service.verify(14).await.expect("in progress"),
      VerificationOutcome::Skipped(SkipReason::InProgress)
   );

   let missing = s.service.verify(99).await.expect_err("no registry");
   assert!(matches!(missing, geosync::Error::RegistryNotFound { model_id: 99, .. }));
}

#[tokio::test]
async fn batch_verifies_only_due_rows() {
   let mut s = setup();
   s.h.cfg.verification_batch_size = 2;
   s.service = VerificationService::new(
      TY,
      s.h.registries.clone(),
      s.replicables.clone(),
      s.checksums.clone(),
      &s.h.cfg,
   )
   .with_clock(s.h.clock.clone());

   for id in 1..=3 {
      synced(&s, id, "sum").await;
      s.checksums.set(id, "sum");
   }
   s.h.registries.insert_pending(TY, &[4], t0()).await.expect("insert");
   assert_eq!(s.service.remaining_verification_batch_count(10).await.expect("count"), 2);

   let first = s.service.verify_batch().await.expect("batch");
   assert_eq!(first.succeeded, 2);
   let second = s.service.verify_batch().await.expect("batch");
   assert_eq!(second.succeeded, 1);
   let third = s.service.verify_batch().await.expect("batch");
   assert_eq!(third.total(), 0);
   assert_eq!(s.service.remaining_verification_batch_count(10).await.expect("count"), 0);
}

#[tokio::test]
async fn stuck_verifications_time_out() {
   let s = setup();
   synced(&s, 5, "x").await;
   let now = s.h.clock.now();
   s.h.registries
      .update(TY, 5, &|r: &mut Registry| r.verification_started(now))
      .await
      .expect("start");

   assert_eq!(s.service.fail_verification_timeouts().await.expect("sweep"), 0);
   s.h.clock.advance(TimeDelta::hours(9));
   assert_eq!(s.service.fail_verification_timeouts().await.expect("sweep"), 1);

   let row = s.h.registry(TY, 5).await;
   assert_eq!(row.verification_state, VerificationState::VerificationFailed);
   assert_eq!(row.verification_retry_count, 1);
   assert_eq!(row.last_verification_failure.as_deref(), Some("Verification timed out after 28800s"));
}

#[tokio::test]
async fn old_verifications_are_queued_for_reverification() {
   let s = setup();
   synced(&s, 6, "x").await;
   s.checksums.set(6, "x");
   s.service.verify(6).await.expect("verify");

   s.h.clock.advance(TimeDelta::days(6));
   assert_eq!(s.service.reverify_batch().await.expect("reverify"), 0);
   s.h.clock.advance(TimeDelta::days(2));
   assert_eq!(s.service.reverify_batch().await.expect("reverify"), 1);

   let row = s.h.registry(TY, 6).await;
   assert_eq!(row.verification_state, VerificationState::VerificationPending);
   assert_eq!(row.state, SyncState::Synced);
   assert_eq!(
      s.service.verify(6).await.expect("verify"),
      VerificationOutcome::Succeeded { checksum: "x".to_string() }
   );
}
