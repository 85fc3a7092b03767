//! Exclusive per-object leases.
//!
//! A lease is identified by a string key and held until it is cancelled with
//! the token returned at acquisition, or until its timeout elapses. Expiry is
//! what lets a crashed worker's object be picked up again.

use std::{
   collections::HashMap,
   fs::{self, File, OpenOptions},
   io::ErrorKind,
   path::PathBuf,
   sync::Arc,
   time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use fs4::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time;
use uuid::Uuid;

use crate::{
   Result,
   clock::{Clock, SystemClock},
   error::Error,
   types::{ModelId, ReplicableType},
   util,
};

/// Proof of ownership returned by [`ExclusiveLease::try_obtain`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(String);

impl LeaseToken {
   pub fn generate() -> Self {
      Self(Uuid::new_v4().to_string())
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }
}

#[async_trait]
pub trait ExclusiveLease: Send + Sync {
   /// Takes the lease for `timeout`, or returns `None` while someone else holds it.
   async fn try_obtain(&self, key: &str, timeout: Duration) -> Result<Option<LeaseToken>>;

   /// Releases the lease if `token` still owns it.
   async fn cancel(&self, key: &str, token: &LeaseToken) -> Result<()>;
}

/// `"<service>:<type>:<id>"`
pub fn lease_key(service: &str, ty: ReplicableType, model_id: ModelId) -> String {
   format!("{service}:{ty}:{model_id}")
}

fn expiry(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
   TimeDelta::from_std(timeout)
      .ok()
      .and_then(|delta| now.checked_add_signed(delta))
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Process-local leases.
pub struct MemoryLease {
   clock:  Arc<dyn Clock>,
   leases: Mutex<HashMap<String, (LeaseToken, DateTime<Utc>)>>,
}

impl MemoryLease {
   pub fn new(clock: Arc<dyn Clock>) -> Self {
      Self { clock, leases: Mutex::new(HashMap::new()) }
   }

   /// Whether an unexpired lease exists for `key`.
   pub fn is_held(&self, key: &str) -> bool {
      let now = self.clock.now();
      self
         .leases
         .lock()
         .get(key)
         .is_some_and(|(_, expires_at)| *expires_at > now)
   }
}

impl Default for MemoryLease {
   fn default() -> Self {
      Self::new(Arc::new(SystemClock))
   }
}

#[async_trait]
impl ExclusiveLease for MemoryLease {
   async fn try_obtain(&self, key: &str, timeout: Duration) -> Result<Option<LeaseToken>> {
      let now = self.clock.now();
      let mut leases = self.leases.lock();
      if let Some((_, expires_at)) = leases.get(key)
         && *expires_at > now
      {
         return Ok(None);
      }
      let token = LeaseToken::generate();
      leases.insert(key.to_string(), (token.clone(), expiry(now, timeout)));
      Ok(Some(token))
   }

   async fn cancel(&self, key: &str, token: &LeaseToken) -> Result<()> {
      let mut leases = self.leases.lock();
      if leases.get(key).is_some_and(|(held, _)| held == token) {
         leases.remove(key);
      }
      Ok(())
   }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseRecord {
   pub key:         String,
   pub token:       LeaseToken,
   pub pid:         u32,
   pub hostname:    String,
   pub obtained_at: DateTime<Utc>,
   pub expires_at:  DateTime<Utc>,
}

const GUARD_WAIT: Duration = Duration::from_secs(5);

/// Leases stored as one JSON record per key under a directory, so separate
/// worker processes on one host exclude each other.
pub struct FileLease {
   dir:   PathBuf,
   clock: Arc<dyn Clock>,
}

impl FileLease {
   pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
      Self { dir: dir.into(), clock }
   }

   fn record_path(&self, key: &str) -> PathBuf {
      self.dir.join(format!("{}.json", hex::encode(key)))
   }

   fn guard_path(&self, key: &str) -> PathBuf {
      self.dir.join(format!("{}.lock", hex::encode(key)))
   }

   /// Current record for `key`, expired or not.
   pub fn read_record(&self, key: &str) -> Result<Option<LeaseRecord>> {
      util::read_json(&self.record_path(key))
   }
}

#[async_trait]
impl ExclusiveLease for FileLease {
   async fn try_obtain(&self, key: &str, timeout: Duration) -> Result<Option<LeaseToken>> {
      let _guard = RecordGuard::lock(self.guard_path(key), GUARD_WAIT).await?;
      let path = self.record_path(key);
      let now = self.clock.now();

      // An unreadable record is treated as absent; the guard makes the rewrite safe.
      if let Ok(Some(record)) = util::read_json::<LeaseRecord>(&path)
         && record.expires_at > now
      {
         return Ok(None);
      }

      let record = LeaseRecord {
         key: key.to_string(),
         token: LeaseToken::generate(),
         pid: std::process::id(),
         hostname: hostname(),
         obtained_at: now,
         expires_at: expiry(now, timeout),
      };
      util::write_json_atomic(&path, &record)?;
      Ok(Some(record.token))
   }

   async fn cancel(&self, key: &str, token: &LeaseToken) -> Result<()> {
      let _guard = RecordGuard::lock(self.guard_path(key), GUARD_WAIT).await?;
      let path = self.record_path(key);
      if let Ok(Some(record)) = util::read_json::<LeaseRecord>(&path)
         && record.token == *token
      {
         fs::remove_file(&path)?;
      }
      Ok(())
   }
}

/// Advisory lock on a per-key guard file, held across one read-modify-write
/// of the lease record. The OS drops it when the holder exits.
struct RecordGuard {
   file: File,
}

impl RecordGuard {
   async fn lock(path: PathBuf, wait: Duration) -> Result<Self> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }
      let file = OpenOptions::new()
         .create(true)
         .truncate(false)
         .write(true)
         .open(&path)?;

      let deadline = Instant::now() + wait;
      loop {
         match FileExt::try_lock_exclusive(&file) {
            Ok(()) => return Ok(Self { file }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {},
            Err(e) => return Err(e.into()),
         }
         if Instant::now() >= deadline {
            return Err(Error::Lease {
               op:     "guard",
               reason: format!("timed out locking {}", path.display()),
            });
         }
         time::sleep(Duration::from_millis(10)).await;
      }
   }
}

impl Drop for RecordGuard {
   fn drop(&mut self) {
      let _ = FileExt::unlock(&self.file);
   }
}

fn hostname() -> String {
   std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}
