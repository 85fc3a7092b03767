#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::{
   collections::{BTreeMap, BTreeSet, VecDeque},
   sync::Arc,
};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use geosync::{
   checksum::ChecksumProvider,
   clock::ManualClock,
   config::Config,
   error::Error,
   housekeeping::{Housekeeping, HousekeepingTask},
   lease::MemoryLease,
   registry::{MemoryRegistryStore, Registry, RegistryStore},
   scheduler::{ChannelScheduler, Job},
   sync::SyncService,
   transfer::{
      Transfer, TransferMode, TransferRequest, TransferResult,
      container::{ContainerError, ContainerRegistryClient, RawManifest},
   },
   types::{ModelId, ReplicableType},
   updates::MemoryUpdateLog,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

pub fn t0() -> DateTime<Utc> {
   Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
      .single()
      .expect("valid timestamp")
}

/// What a [`ScriptedTransfer`] does on its next attempt.
pub enum Step {
   Return(TransferResult),
   Error(String),
   Panic(&'static str),
}

/// Transfer that replays scripted results, then succeeds.
pub struct ScriptedTransfer {
   steps:    Mutex<VecDeque<Step>>,
   requests: Mutex<Vec<TransferRequest>>,
   modes:    Vec<TransferMode>,
   gate:     Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedTransfer {
   pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
      Self {
         steps:    Mutex::new(steps.into_iter().collect()),
         requests: Mutex::new(Vec::new()),
         modes:    vec![TransferMode::Incremental],
         gate:     None,
      }
   }

   pub fn succeeding() -> Self {
      Self::new([])
   }

   pub fn with_modes(mut self, modes: &[TransferMode]) -> Self {
      self.modes = modes.to_vec();
      self
   }

   /// Each attempt signals `entered`, then waits for `release`.
   pub fn gated(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
      self.gate = Some((entered, release));
      self
   }

   pub fn requests(&self) -> Vec<TransferRequest> {
      self.requests.lock().clone()
   }

   pub fn modes_seen(&self) -> Vec<TransferMode> {
      self.requests.lock().iter().map(|r| r.mode).collect()
   }
}

#[async_trait::async_trait]
impl Transfer for ScriptedTransfer {
   fn supports(&self, mode: TransferMode) -> bool {
      self.modes.contains(&mode)
   }

   async fn attempt(&self, request: &TransferRequest) -> geosync::Result<TransferResult> {
      self.requests.lock().push(request.clone());
      if let Some((entered, release)) = &self.gate {
         entered.notify_one();
         release.notified().await;
      }
      let step = self.steps.lock().pop_front();
      match step {
         None => Ok(TransferResult::succeeded(1024)),
         Some(Step::Return(result)) => Ok(result),
         Some(Step::Error(reason)) => Err(Error::Transfer(reason)),
         Some(Step::Panic(message)) => panic!("{message}"),
      }
   }
}

/// Records every housekeeping call; optionally fails them all.
#[derive(Default)]
pub struct RecordingHousekeeping {
   pub calls: Mutex<Vec<(ModelId, Option<HousekeepingTask>)>>,
   pub fail:  bool,
}

#[async_trait::async_trait]
impl Housekeeping for RecordingHousekeeping {
   async fn execute(
      &self,
      _ty: ReplicableType,
      model_id: ModelId,
      task: Option<HousekeepingTask>,
   ) -> geosync::Result<()> {
      self.calls.lock().push((model_id, task));
      if self.fail {
         return Err(Error::Transfer("gc crashed".to_string()));
      }
      Ok(())
   }
}

/// Local checksums set per object; unknown objects fail to checksum.
#[derive(Default)]
pub struct FixedChecksums {
   sums: Mutex<BTreeMap<ModelId, String>>,
}

impl FixedChecksums {
   pub fn set(&self, model_id: ModelId, checksum: &str) {
      self.sums.lock().insert(model_id, checksum.to_string());
   }
}

#[async_trait::async_trait]
impl ChecksumProvider for FixedChecksums {
   async fn checksum(&self, _ty: ReplicableType, model_id: ModelId) -> geosync::Result<String> {
      self
         .sums
         .lock()
         .get(&model_id)
         .cloned()
         .ok_or_else(|| Error::Checksum(format!("cannot read object {model_id}")))
   }
}

/// Shared wiring for sync tests.
pub struct Harness {
   pub clock:      Arc<ManualClock>,
   pub registries: Arc<MemoryRegistryStore>,
   pub lease:      Arc<MemoryLease>,
   pub updates:    Arc<MemoryUpdateLog>,
   pub scheduler:  Arc<ChannelScheduler>,
   pub jobs:       flume::Receiver<Job>,
   pub cfg:        Config,
}

impl Harness {
   pub fn new() -> Self {
      let clock = Arc::new(ManualClock::new(t0()));
      let (scheduler, jobs) = ChannelScheduler::unbounded();
      Self {
         lease: Arc::new(MemoryLease::new(clock.clone())),
         clock,
         registries: Arc::new(MemoryRegistryStore::new()),
         updates: Arc::new(MemoryUpdateLog::new()),
         scheduler: Arc::new(scheduler),
         jobs,
         cfg: Config::default(),
      }
   }

   pub fn sync_service(&self, ty: ReplicableType, transfer: Arc<dyn Transfer>) -> SyncService {
      SyncService::new(
         ty,
         self.registries.clone(),
         self.lease.clone(),
         transfer,
         self.scheduler.clone(),
         &self.cfg,
      )
      .with_updates(self.updates.clone())
      .with_clock(self.clock.clone())
   }

   pub fn with_housekeeping(
      &self,
      service: SyncService,
      housekeeping: Arc<RecordingHousekeeping>,
   ) -> SyncService {
      service.with_housekeeping(housekeeping)
   }

   pub async fn registry(&self, ty: ReplicableType, model_id: ModelId) -> Registry {
      self
         .registries
         .find(ty, model_id)
         .await
         .expect("find")
         .expect("registry exists")
   }

   pub fn drain_jobs(&self) -> Vec<Job> {
      self.jobs.drain().collect()
   }
}

/// Container registry held in memory: tags, manifests and blobs per repository.
#[derive(Default)]
pub struct MemoryContainerRegistry {
   pub tags:             Mutex<BTreeMap<String, String>>,
   pub manifests:        Mutex<BTreeMap<String, (Bytes, Option<String>)>>,
   pub blobs:            Mutex<BTreeSet<String>>,
   pub pushed_blobs:     Mutex<Vec<String>>,
   pub pushed_manifests: Mutex<Vec<(String, String)>>,
   pub deleted_tags:     Mutex<Vec<String>>,
}

impl MemoryContainerRegistry {
   pub fn tag(&self, tag: &str, digest: &str) {
      self.tags.lock().insert(tag.to_string(), digest.to_string());
   }

   pub fn put_manifest(&self, reference: &str, body: &str, media_type: Option<&str>) {
      self.manifests.lock().insert(
         reference.to_string(),
         (Bytes::from(body.to_string()), media_type.map(str::to_string)),
      );
   }

   pub fn blob(&self, digest: &str) {
      self.blobs.lock().insert(digest.to_string());
   }

   pub fn pushed_blobs(&self) -> Vec<String> {
      self.pushed_blobs.lock().clone()
   }

   pub fn pushed_manifests(&self) -> Vec<(String, String)> {
      self.pushed_manifests.lock().clone()
   }

   pub fn deleted_tags(&self) -> Vec<String> {
      self.deleted_tags.lock().clone()
   }
}

fn not_found(op: &'static str, reference: &str) -> ContainerError {
   ContainerError::Request { op, reference: reference.to_string(), reason: "404".to_string() }
}

#[async_trait::async_trait]
impl ContainerRegistryClient for MemoryContainerRegistry {
   async fn tags(&self, _repository: &str) -> Result<BTreeMap<String, String>, ContainerError> {
      Ok(self.tags.lock().clone())
   }

   async fn manifest(
      &self,
      _repository: &str,
      reference: &str,
   ) -> Result<RawManifest, ContainerError> {
      self
         .manifests
         .lock()
         .get(reference)
         .map(|(body, media_type)| RawManifest { body: body.clone(), media_type: media_type.clone() })
         .ok_or_else(|| not_found("manifest", reference))
   }

   async fn blob_exists(&self, _repository: &str, digest: &str) -> Result<bool, ContainerError> {
      Ok(self.blobs.lock().contains(digest))
   }

   async fn pull_blob(&self, _repository: &str, digest: &str) -> Result<Bytes, ContainerError> {
      if self.blobs.lock().contains(digest) {
         Ok(Bytes::from(format!("blob {digest}")))
      } else {
         Err(not_found("pull_blob", digest))
      }
   }

   async fn push_blob(
      &self,
      _repository: &str,
      digest: &str,
      _data: Bytes,
   ) -> Result<(), ContainerError> {
      self.blobs.lock().insert(digest.to_string());
      self.pushed_blobs.lock().push(digest.to_string());
      Ok(())
   }

   async fn push_manifest(
      &self,
      _repository: &str,
      reference: &str,
      _body: Bytes,
      media_type: &str,
   ) -> Result<(), ContainerError> {
      self
         .pushed_manifests
         .lock()
         .push((reference.to_string(), media_type.to_string()));
      Ok(())
   }

   async fn delete_tag(
      &self,
      _repository: &str,
      tag: &str,
      _digest: &str,
   ) -> Result<(), ContainerError> {
      self.tags.lock().remove(tag);
      self.deleted_tags.lock().push(tag.to_string());
      Ok(())
   }
}
