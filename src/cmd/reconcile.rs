//! Registry consistency command.

use std::path::Path;

use console::style;
use serde::Serialize;

use crate::{
   Result, config,
   cmd::{Workspace, print_json, selected_types},
   consistency::RegistryConsistencyService,
   types::ReplicableType,
};

#[derive(Serialize)]
struct ReconcileJson {
   replicable_type: ReplicableType,
   passes:          usize,
   created:         usize,
   deleted:         usize,
}

/// Runs consistency passes per type until a pass does no work or
/// `max_passes` is reached.
pub async fn execute(
   data_dir: &Path,
   ty: Option<ReplicableType>,
   max_passes: usize,
   json: bool,
) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   let cfg = config::get();

   let mut rows = Vec::new();
   for ty in selected_types(ty) {
      let service = RegistryConsistencyService::new(
         ty,
         ws.registries.clone(),
         ws.replicables.clone(),
         ws.cursors.clone(),
         cfg,
      );
      let mut row = ReconcileJson { replicable_type: ty, passes: 0, created: 0, deleted: 0 };
      while row.passes < max_passes {
         let report = service.reconcile().await?;
         row.passes += 1;
         row.created += report.created;
         row.deleted += report.deleted;
         if !report.did_work() {
            break;
         }
      }
      rows.push(row);
   }
   ws.persist()?;

   if json {
      return print_json(&rows);
   }
   for row in rows.iter().filter(|r| r.created > 0 || r.deleted > 0) {
      println!(
         "{} {} created, {} deleted {}",
         style(row.replicable_type).bold(),
         style(row.created).green(),
         style(row.deleted).red(),
         style(format!("({} passes)", row.passes)).dim()
      );
   }
   if rows.iter().all(|r| r.created == 0 && r.deleted == 0) {
      println!("{}", style("Registries already consistent").dim());
   }
   Ok(())
}
