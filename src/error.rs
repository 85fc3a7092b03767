use std::io;

use thiserror::Error;

use crate::{transfer::container::ContainerError, types::ReplicableType};

/// Main error type for geosync.
///
/// Business-data failures (a transfer that did not succeed, a checksum that
/// does not match) are recorded on the registry row and never surface here.
/// The variants below are infrastructure or programming errors that abort the
/// current unit of work.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error while reading or writing local state.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// JSON serialization or deserialization error occurred.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// Container registry client error.
   #[error("container registry error: {0}")]
   Container(#[from] ContainerError),

   /// A state-machine operation was applied to a row in the wrong state.
   #[error("invalid {machine} transition from {from} to {to}")]
   InvalidTransition { machine: &'static str, from: &'static str, to: &'static str },

   /// No registry row exists for the object.
   #[error("no {replicable_type} registry for model {model_id}")]
   RegistryNotFound { replicable_type: ReplicableType, model_id: u64 },

   /// A replicable type name could not be parsed.
   #[error("unknown replicable type: {0}")]
   UnknownReplicableType(String),

   /// Lease service failure (not contention, which is a normal outcome).
   #[error("lease error during {op}: {reason}")]
   Lease { op: &'static str, reason: String },

   /// Registry or cursor store failure.
   #[error("store error during {op}: {reason}")]
   Store { op: &'static str, reason: String },

   /// Enqueueing work failed.
   #[error("scheduler error: {0}")]
   Scheduler(String),

   /// Transfer collaborator failure.
   #[error("transfer error: {0}")]
   Transfer(String),

   /// Checksum collaborator failure.
   #[error("checksum error: {0}")]
   Checksum(String),

   /// Local storage removal failure.
   #[error("local storage error: {0}")]
   LocalStorage(String),

   /// The command already printed its failure; only the exit code is left.
   #[error("{op} failed")]
   Reported { op: &'static str },
}

impl Error {
   pub fn exit_code(&self) -> i32 {
      match self {
         Self::Lease { .. } => 10,
         Self::Store { .. } | Self::Io(_) | Self::Json(_) => 11,
         Self::Scheduler(_) => 12,
         Self::UnknownReplicableType(_) | Self::Config(_) => 2,
         _ => 1,
      }
   }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// A setting is out of its accepted range.
   #[error("invalid config: {0}")]
   Invalid(String),
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
