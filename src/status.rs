//! Per-type tallies of sync and verification states.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
   Result,
   registry::{RegistryStore, SyncState, VerificationState},
   types::ReplicableType,
};

const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeStatus {
   pub total:                usize,
   pub sync:                 BTreeMap<&'static str, usize>,
   pub verification:         BTreeMap<&'static str, usize>,
   pub missing_on_primary:   usize,
   pub checksum_mismatched:  usize,
   /// Failed rows whose retry time has passed.
   pub retry_due:            usize,
   pub last_successful_sync: Option<DateTime<Utc>>,
}

impl TypeStatus {
   pub fn count(&self, state: SyncState) -> usize {
      self.sync.get(state.as_str()).copied().unwrap_or(0)
   }

   pub fn verification_count(&self, state: VerificationState) -> usize {
      self.verification.get(state.as_str()).copied().unwrap_or(0)
   }

   /// Percentage of rows in `synced`, or `None` with no rows.
   pub fn synced_percent(&self) -> Option<f64> {
      (self.total > 0).then(|| self.count(SyncState::Synced) as f64 * 100.0 / self.total as f64)
   }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
   pub generated_at: Option<DateTime<Utc>>,
   pub types:        BTreeMap<&'static str, TypeStatus>,
}

/// Tallies one replicable type by paging through its rows in id order.
pub async fn type_status(
   registries: &dyn RegistryStore,
   ty: ReplicableType,
   now: DateTime<Utc>,
) -> Result<TypeStatus> {
   let mut status = TypeStatus::default();
   let mut after = 0;
   loop {
      let page = registries.scan(ty, after, PAGE_SIZE).await?;
      let Some(last) = page.last() else {
         break;
      };
      after = last.id;
      let short = page.len() < PAGE_SIZE;

      for row in &page {
         status.total += 1;
         *status.sync.entry(row.state.as_str()).or_default() += 1;
         *status
            .verification
            .entry(row.verification_state.as_str())
            .or_default() += 1;
         if row.missing_on_primary {
            status.missing_on_primary += 1;
         }
         if row.checksum_mismatch() {
            status.checksum_mismatched += 1;
         }
         if row.state == SyncState::Failed && row.sync_due(now) {
            status.retry_due += 1;
         }
         status.last_successful_sync = status.last_successful_sync.max(row.last_successful_sync_at);
      }
      if short {
         break;
      }
   }
   Ok(status)
}

pub async fn collect(
   registries: &dyn RegistryStore,
   types: &[ReplicableType],
   now: DateTime<Utc>,
) -> Result<StatusReport> {
   let mut report = StatusReport { generated_at: Some(now), types: BTreeMap::new() };
   for &ty in types {
      report.types.insert(ty.as_str(), type_status(registries, ty, now).await?);
   }
   Ok(report)
}
