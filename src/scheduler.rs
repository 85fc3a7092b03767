//! Enqueueing follow-up work.
//!
//! Services never run follow-up work inline; they hand a [`Job`] to a
//! [`Scheduler`] and return.

use std::{
   fs::{self, OpenOptions},
   io::Write,
   path::{Path, PathBuf},
};

use async_trait::async_trait;
use fs4::FileExt;
use serde::{Deserialize, Serialize};

use crate::{
   Result,
   error::Error,
   types::{ModelId, ReplicableType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
   Sync { replicable_type: ReplicableType, model_id: ModelId },
   Verification { replicable_type: ReplicableType, model_id: ModelId },
}

#[async_trait]
pub trait Scheduler: Send + Sync {
   async fn enqueue(&self, job: Job) -> Result<()>;

   async fn enqueue_sync(&self, ty: ReplicableType, model_id: ModelId) -> Result<()> {
      self.enqueue(Job::Sync { replicable_type: ty, model_id }).await
   }

   async fn enqueue_verification(&self, ty: ReplicableType, model_id: ModelId) -> Result<()> {
      self
         .enqueue(Job::Verification { replicable_type: ty, model_id })
         .await
   }
}

/// Scheduler feeding an in-process worker through a flume channel.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
   tx: flume::Sender<Job>,
}

impl ChannelScheduler {
   pub fn unbounded() -> (Self, flume::Receiver<Job>) {
      let (tx, rx) = flume::unbounded();
      (Self { tx }, rx)
   }
}

#[async_trait]
impl Scheduler for ChannelScheduler {
   async fn enqueue(&self, job: Job) -> Result<()> {
      self
         .tx
         .send_async(job)
         .await
         .map_err(|_| Error::Scheduler("job channel closed".to_string()))
   }
}

/// Appends jobs as JSON lines to a queue file for an external runner.
#[derive(Debug, Clone)]
pub struct FileQueueScheduler {
   path: PathBuf,
}

impl FileQueueScheduler {
   pub fn new(path: impl Into<PathBuf>) -> Self {
      Self { path: path.into() }
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   /// Jobs currently in the queue, oldest first.
   pub fn pending(&self) -> Result<Vec<Job>> {
      let raw = match fs::read_to_string(&self.path) {
         Ok(raw) => raw,
         Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
         Err(e) => return Err(e.into()),
      };
      raw.lines()
         .filter(|line| !line.trim().is_empty())
         .map(|line| serde_json::from_str(line).map_err(Error::from))
         .collect()
   }

   fn append(&self, job: Job) -> std::io::Result<()> {
      if let Some(parent) = self.path.parent() {
         fs::create_dir_all(parent)?;
      }
      let mut file = OpenOptions::new()
         .create(true)
         .append(true)
         .open(&self.path)?;
      FileExt::lock_exclusive(&file)?;
      let line = serde_json::to_string(&job)?;
      let written = writeln!(file, "{line}").and_then(|()| file.sync_data());
      let _ = FileExt::unlock(&file);
      written
   }
}

#[async_trait]
impl Scheduler for FileQueueScheduler {
   async fn enqueue(&self, job: Job) -> Result<()> {
      let this = self.clone();
      tokio::task::spawn_blocking(move || this.append(job))
         .await
         .map_err(|e| Error::Scheduler(format!("queue writer panicked: {e}")))?
         .map_err(|e| Error::Scheduler(format!("append to {}: {e}", self.path.display())))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn channel_scheduler_delivers_jobs_in_order() {
      let (scheduler, rx) = ChannelScheduler::unbounded();
      scheduler.enqueue_sync(ReplicableType::Wiki, 1).await.expect("sync");
      scheduler
         .enqueue_verification(ReplicableType::Wiki, 2)
         .await
         .expect("verify");

      assert_eq!(rx.recv_async().await.expect("recv"), Job::Sync {
         replicable_type: ReplicableType::Wiki,
         model_id:        1,
      });
      assert_eq!(rx.recv_async().await.expect("recv"), Job::Verification {
         replicable_type: ReplicableType::Wiki,
         model_id:        2,
      });
   }

   #[tokio::test]
   async fn closed_channel_is_a_scheduler_error() {
      let (scheduler, rx) = ChannelScheduler::unbounded();
      drop(rx);
      let err = scheduler
         .enqueue_sync(ReplicableType::Upload, 1)
         .await
         .expect_err("closed");
      assert!(matches!(err, Error::Scheduler(_)));
   }

   #[tokio::test]
   async fn file_queue_appends_json_lines() {
      let dir = tempfile::tempdir().expect("tempdir");
      let scheduler = FileQueueScheduler::new(dir.path().join("queue.jsonl"));
      scheduler.enqueue_sync(ReplicableType::LfsObject, 5).await.expect("enqueue");
      scheduler.enqueue_sync(ReplicableType::LfsObject, 6).await.expect("enqueue");

      let jobs = scheduler.pending().expect("pending");
      assert_eq!(jobs.len(), 2);
      let raw = fs::read_to_string(scheduler.path()).expect("read");
      assert!(raw.starts_with(r#"{"job":"sync","replicable_type":"lfs_object","model_id":5}"#));
   }
}
