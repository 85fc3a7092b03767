//! Registry status command.
//!
//! Shows per-type sync and verification tallies.

use std::path::Path;

use chrono::Utc;
use console::style;

use crate::{
   Result,
   cmd::{Workspace, print_json, selected_types},
   registry::{SyncState, VerificationState},
   status,
   types::{ReplicableType, capitalize},
};

pub async fn execute(data_dir: &Path, ty: Option<ReplicableType>, json: bool) -> Result<()> {
   let ws = Workspace::open_read_only(data_dir)?;
   let types = selected_types(ty);
   let report = status::collect(&*ws.registries, &types, Utc::now()).await?;

   if json {
      return print_json(&report);
   }

   let mut shown = 0;
   for selected in types {
      let Some(status) = report.types.get(selected.as_str()) else {
         continue;
      };
      if status.total == 0 && ty.is_none() {
         continue;
      }
      shown += 1;
      let percent = status
         .synced_percent()
         .map_or_else(|| "-".to_string(), |p| format!("{p:.1}%"));
      println!(
         "{} {}",
         style(capitalize(selected.human_name())).bold(),
         style(format!("({} registries, {percent} synced)", status.total)).dim()
      );
      println!(
         "  sync:         {} synced  {} pending  {} started  {} failed",
         style(status.count(SyncState::Synced)).green(),
         status.count(SyncState::Pending),
         status.count(SyncState::Started),
         style(status.count(SyncState::Failed)).red(),
      );
      println!(
         "  verification: {} succeeded  {} pending  {} failed  {} disabled",
         style(status.verification_count(VerificationState::VerificationSucceeded)).green(),
         status.verification_count(VerificationState::VerificationPending),
         style(status.verification_count(VerificationState::VerificationFailed)).red(),
         status.verification_count(VerificationState::VerificationDisabled),
      );
      if status.missing_on_primary > 0 || status.checksum_mismatched > 0 {
         println!(
            "  {} missing on primary, {} checksum mismatches",
            style(status.missing_on_primary).yellow(),
            style(status.checksum_mismatched).yellow(),
         );
      }
      if let Some(at) = status.last_successful_sync {
         println!("  last successful sync: {}", style(at.to_rfc3339()).dim());
      }
   }

   if shown == 0 {
      println!("{}", style("No registries").dim());
   }
   Ok(())
}
