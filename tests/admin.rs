use std::sync::Arc;

use chrono::Utc;
use geosync::{
   admin::{Action, RegistryStateTransition},
   backoff::RetryPolicy,
   registry::{MemoryRegistryStore, Registry, RegistryStore, SyncState, VerificationState},
   scheduler::{ChannelScheduler, Job},
   types::ReplicableType,
};

const TY: ReplicableType = ReplicableType::Wiki;

async fn failed_row(store: &MemoryRegistryStore, id: u64) {
   let now = Utc::now();
   store.insert_pending(TY, &[id], now).await.expect("insert");
   store
      .update(TY, id, &|r: &mut Registry| {
         r.mark_started(now)?;
         r.mark_failed(now, "boom", false, &RetryPolicy::default())
      })
      .await
      .expect("fail");
}

#[tokio::test]
async fn resync_marks_pending_and_enqueues() {
   let store = Arc::new(MemoryRegistryStore::new());
   failed_row(&store, 4).await;
   let (scheduler, jobs) = ChannelScheduler::unbounded();
   let transition = RegistryStateTransition::new(store.clone(), Arc::new(scheduler));

   let result = transition.execute(TY, 4, "resync").await;
   assert!(result.success, "{result:?}");
   assert_eq!(result.message, "Wiki registry for model 4 scheduled for resync");
   assert!(result.errors.is_empty());

   let row = store.find(TY, 4).await.expect("find").expect("row");
   assert_eq!(row.state, SyncState::Pending);
   assert_eq!(row.retry_at, None);
   assert!(row.sync_due(Utc::now()));
   assert_eq!(jobs.drain().collect::<Vec<_>>(), vec![Job::Sync { replicable_type: TY, model_id: 4 }]);
}

#[tokio::test]
async fn reverify_resets_verification_and_enqueues() {
   let store = Arc::new(MemoryRegistryStore::new());
   let now = Utc::now();
   store.insert_pending(TY, &[8], now).await.expect("insert");
   store
      .update(TY, 8, &|r: &mut Registry| {
         r.mark_started(now)?;
         r.mark_synced(now, false)?;
         r.verification_started(now)?;
         r.verification_succeeded(now, "abc")
      })
      .await
      .expect("verify");
   let (scheduler, jobs) = ChannelScheduler::unbounded();
   let transition = RegistryStateTransition::new(store.clone(), Arc::new(scheduler));

   let result = transition.execute(TY, 8, "reverify").await;
   assert!(result.success);
   assert_eq!(result.message, "Wiki registry for model 8 scheduled for reverify");
   let row = store.find(TY, 8).await.expect("find").expect("row");
   assert_eq!(row.verification_state, VerificationState::VerificationPending);
   assert_eq!(row.state, SyncState::Synced);
   assert_eq!(
      jobs.drain().collect::<Vec<_>>(),
      vec![Job::Verification { replicable_type: TY, model_id: 8 }]
   );
}

#[tokio::test]
async fn unsupported_action_is_rejected_without_side_effects() {
   let store = Arc::new(MemoryRegistryStore::new());
   failed_row(&store, 1).await;
   let before = store.find(TY, 1).await.expect("find");
   let (scheduler, jobs) = ChannelScheduler::unbounded();
   let transition = RegistryStateTransition::new(store.clone(), Arc::new(scheduler));

   let result = transition.execute(TY, 1, "destroy").await;
   assert!(!result.success);
   assert_eq!(result.message, "Unsupported action");
   assert_eq!(result.errors, vec!["Action 'destroy' is not supported".to_string()]);
   assert_eq!(store.find(TY, 1).await.expect("find"), before);
   assert!(jobs.is_empty());
}

#[tokio::test]
async fn missing_registry_is_reported() {
   let (scheduler, _jobs) = ChannelScheduler::unbounded();
   let transition =
      RegistryStateTransition::new(Arc::new(MemoryRegistryStore::new()), Arc::new(scheduler));

   let result = transition.execute(TY, 77, "resync").await;
   assert!(!result.success);
   assert_eq!(result.message, "Registry not found");
   assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn reverify_of_disabled_row_is_refused() {
   let store = Arc::new(MemoryRegistryStore::new());
   store.insert_pending(TY, &[2], Utc::now()).await.expect("insert");
   store
      .update(TY, 2, &|r: &mut Registry| {
         r.disable_verification();
         Ok(())
      })
      .await
      .expect("disable");
   let (scheduler, jobs) = ChannelScheduler::unbounded();
   let transition = RegistryStateTransition::new(store.clone(), Arc::new(scheduler));

   let result = transition.execute(TY, 2, "reverify").await;
   assert!(!result.success);
   assert_eq!(result.message, "Could not reverify registry");
   assert!(jobs.is_empty());
}

#[tokio::test]
async fn enqueue_failure_is_reported() {
   let store = Arc::new(MemoryRegistryStore::new());
   failed_row(&store, 3).await;
   let (scheduler, jobs) = ChannelScheduler::unbounded();
   drop(jobs);
   let transition = RegistryStateTransition::new(store.clone(), Arc::new(scheduler));

   let result = transition.execute(TY, 3, "resync").await;
   assert!(!result.success);
   assert_eq!(result.message, "Error while trying to resync registry");
   assert!(result.errors[0].contains("job channel closed"));
}

#[test]
fn actions_parse_from_names() {
   assert_eq!("resync".parse::<Action>(), Ok(Action::Resync));
   assert_eq!("reverify".parse::<Action>(), Ok(Action::Reverify));
   assert!("Resync".parse::<Action>().is_err());
   assert_eq!(Action::Reverify.to_string(), "reverify");
}

