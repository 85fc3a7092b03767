//! Moving object content from the primary to this site.

pub mod container;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
   Result,
   types::{ModelId, ReplicableType},
};

/// How much of the local copy a transfer may reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
   /// Fetch only what changed.
   Incremental,
   /// First sync: build the local copy from scratch in one pass.
   Clone,
   /// Discard the local copy and fetch everything again.
   Redownload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
   pub replicable_type: ReplicableType,
   pub model_id:        ModelId,
   pub mode:            TransferMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferResult {
   pub success:            bool,
   pub bytes_transferred:  u64,
   pub missing_on_primary: bool,
   pub failure_reason:     Option<String>,
}

impl TransferResult {
   pub const fn succeeded(bytes_transferred: u64) -> Self {
      Self { success: true, bytes_transferred, missing_on_primary: false, failure_reason: None }
   }

   pub fn failed(reason: impl Into<String>) -> Self {
      Self { failure_reason: Some(reason.into()), ..Self::default() }
   }

   /// The primary has no copy of the object; retried on the longer cap.
   pub fn missing_on_primary(reason: impl Into<String>) -> Self {
      Self { missing_on_primary: true, ..Self::failed(reason) }
   }

   pub fn reason(&self) -> &str {
      self.failure_reason.as_deref().unwrap_or("unknown transfer failure")
   }
}

/// Transport for one replicable type.
///
/// `Ok` with `success == false` is an ordinary failure that gets recorded on
/// the registry; `Err` is treated the same way by the sync orchestrator but
/// logged as unexpected.
#[async_trait]
pub trait Transfer: Send + Sync {
   /// Modes other than [`TransferMode::Incremental`] are opt-in.
   fn supports(&self, mode: TransferMode) -> bool {
      mode == TransferMode::Incremental
   }

   async fn attempt(&self, request: &TransferRequest) -> Result<TransferResult>;
}
