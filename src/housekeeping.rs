//! Post-sync maintenance of local git copies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
   Result,
   config::Config,
   registry::Registry,
   types::{ModelId, ReplicableType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HousekeepingTask {
   Gc,
   FullRepack,
   IncrementalRepack,
}

#[async_trait]
pub trait Housekeeping: Send + Sync {
   /// Runs after every successful sync; `task` is `None` when no maintenance
   /// is due.
   async fn execute(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      task: Option<HousekeepingTask>,
   ) -> Result<()>;
}

/// Maintenance periods, counted in successful syncs since the last gc.
///
/// The count lives on the registry row, so every worker sees the same value
/// and it goes away with the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingPeriods {
   gc:                 u64,
   full_repack:        u64,
   incremental_repack: u64,
}

impl HousekeepingPeriods {
   pub fn new(gc: u64, full_repack: u64, incremental_repack: u64) -> Self {
      Self {
         gc:                 gc.max(1),
         full_repack:        full_repack.max(1),
         incremental_repack: incremental_repack.max(1),
      }
   }

   pub fn from_config(cfg: &Config) -> Self {
      Self::new(
         cfg.housekeeping_gc_period,
         cfg.housekeeping_full_repack_period,
         cfg.housekeeping_incremental_repack_period,
      )
   }

   /// Counts a successful sync on `registry` and returns the task now due.
   /// A new object always gets a gc; a gc resets the count.
   pub fn record_sync(
      &self,
      registry: &mut Registry,
      new_object: bool,
   ) -> Option<HousekeepingTask> {
      let count = registry.syncs_since_gc.saturating_add(1);
      let task = if new_object || count % self.gc == 0 {
         Some(HousekeepingTask::Gc)
      } else if count % self.full_repack == 0 {
         Some(HousekeepingTask::FullRepack)
      } else if count % self.incremental_repack == 0 {
         Some(HousekeepingTask::IncrementalRepack)
      } else {
         None
      };

      registry.syncs_since_gc = if task == Some(HousekeepingTask::Gc) { 0 } else { count };
      task
   }
}

impl Default for HousekeepingPeriods {
   fn default() -> Self {
      Self::from_config(&Config::default())
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;

   use super::*;

   fn row(model_id: ModelId) -> Registry {
      Registry::new(model_id, ReplicableType::Repository, model_id, Utc::now())
   }

   #[test]
   fn new_object_gets_gc() {
      let mut r = row(1);
      r.syncs_since_gc = 7;
      let task = HousekeepingPeriods::default().record_sync(&mut r, true);
      assert_eq!(task, Some(HousekeepingTask::Gc));
      assert_eq!(r.syncs_since_gc, 0);
   }

   #[test]
   fn periods_pick_the_largest_due_task() {
      let periods = HousekeepingPeriods::new(200, 50, 10);
      let mut r = row(1);
      let tasks: Vec<_> = (0..200).map(|_| periods.record_sync(&mut r, false)).collect();
      let count = |task| tasks.iter().filter(|t| **t == Some(task)).count();
      assert_eq!(count(HousekeepingTask::Gc), 1);
      assert_eq!(count(HousekeepingTask::FullRepack), 3);
      assert_eq!(count(HousekeepingTask::IncrementalRepack), 16);
      assert_eq!(tasks[9], Some(HousekeepingTask::IncrementalRepack));
      assert_eq!(tasks[49], Some(HousekeepingTask::FullRepack));
      assert_eq!(tasks[199], Some(HousekeepingTask::Gc));
      assert_eq!(r.syncs_since_gc, 0);
   }

   #[test]
   fn count_continues_from_the_stored_value() {
      let periods = HousekeepingPeriods::new(4, 3, 2);
      let mut r = row(2);
      r.syncs_since_gc = 3;
      assert_eq!(periods.record_sync(&mut r, false), Some(HousekeepingTask::Gc));
      assert_eq!(periods.record_sync(&mut r, false), None);
      assert_eq!(r.syncs_since_gc, 1);
   }
}
