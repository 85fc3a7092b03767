//! Bulk resync and reverify commands.

use std::path::Path;

use console::style;
use serde::Serialize;

use crate::{
   Result,
   bulk::{BulkRunReport, BulkTransition, BulkUpdateService, MarkPending, MarkVerificationPending},
   config,
   cmd::{Workspace, print_json},
   types::ReplicableType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkKind {
   Resync,
   Reverify,
}

#[derive(Serialize)]
struct BulkJson {
   replicable_type: ReplicableType,
   transition:      &'static str,
   batches:         usize,
   updated:         usize,
   done:            bool,
   cursor:          u64,
   remaining:       usize,
}

pub async fn execute(
   data_dir: &Path,
   kind: BulkKind,
   ty: ReplicableType,
   max_batches: usize,
   json: bool,
) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   let out = match kind {
      BulkKind::Resync => run::<MarkPending>(&ws, ty, max_batches).await?,
      BulkKind::Reverify => run::<MarkVerificationPending>(&ws, ty, max_batches).await?,
   };
   ws.persist()?;

   if json {
      return print_json(&out);
   }
   println!(
      "{} {} registries updated in {} batches",
      style(format!("{} {}", out.transition, out.replicable_type)).bold(),
      style(out.updated).green(),
      out.batches
   );
   if out.done {
      println!("{}", style("Sweep finished").dim());
   } else {
      println!(
         "{}",
         style(format!("Paused at registry {}, about {} batches left", out.cursor, out.remaining))
            .yellow()
      );
   }
   Ok(())
}

async fn run<T: BulkTransition>(
   ws: &Workspace,
   ty: ReplicableType,
   max_batches: usize,
) -> Result<BulkJson> {
   let service =
      BulkUpdateService::<T>::new(ty, ws.registries.clone(), ws.cursors.clone(), config::get());
   let BulkRunReport { batches, updated, done } = service.run(max_batches).await?;
   Ok(BulkJson {
      replicable_type: ty,
      transition: T::NAME,
      batches,
      updated,
      done,
      cursor: service.cursor().await?,
      remaining: service.remaining_batches(max_batches.max(1)).await?,
   })
}
