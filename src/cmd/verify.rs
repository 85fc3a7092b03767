//! Verifies local copies against the primary's checksums.

use std::{path::Path, sync::Arc};

use console::style;
use serde::Serialize;

use crate::{
   Result,
   checksum::FileSystemChecksum,
   cmd::{Workspace, print_json},
   config,
   registry::{Registry, RegistryStore},
   types::{ModelId, ReplicableType, capitalize},
   verification::{VerificationOutcome, VerificationService},
};

#[derive(Serialize)]
struct BatchJson {
   replicable_type: ReplicableType,
   timed_out:       usize,
   reverify_queued: usize,
   succeeded:       usize,
   mismatched:      usize,
   errored:         usize,
   skipped:         usize,
   failed:          usize,
}

/// With a model id, verifies that object; otherwise runs one maintenance
/// round for the type: time out stuck verifications, queue reverification,
/// then verify a batch.
pub async fn execute(
   data_dir: &Path,
   ty: ReplicableType,
   model_id: Option<ModelId>,
   json: bool,
) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   let service = VerificationService::new(
      ty,
      ws.registries.clone(),
      ws.replicables.clone(),
      Arc::new(FileSystemChecksum::new(ws.objects_dir())),
      config::get(),
   );

   if let Some(model_id) = model_id {
      let outcome = service.verify(model_id).await;
      ws.persist()?;
      let outcome = outcome?;
      match outcome {
         VerificationOutcome::Skipped(reason) => {
            println!("{} {}", style("skipped").dim(), style(format!("{reason:?}")).dim());
         },
         VerificationOutcome::Succeeded { checksum } => {
            println!("{} {}", style("verified").green(), style(checksum).dim());
         },
         VerificationOutcome::Mismatch { primary, local } => {
            println!("{} primary {primary}, local {local}", style("mismatch").red());
         },
         VerificationOutcome::Errored { reason } => {
            println!("{} {reason}", style("error").red());
         },
      }
      return Ok(());
   }

   let timed_out = service.fail_verification_timeouts().await?;
   let reverify_queued = service.reverify_batch().await?;
   let batch = service.verify_batch().await?;
   ws.persist()?;

   let out = BatchJson {
      replicable_type: ty,
      timed_out,
      reverify_queued,
      succeeded: batch.succeeded,
      mismatched: batch.mismatched,
      errored: batch.errored,
      skipped: batch.skipped,
      failed: batch.failed,
   };
   if json {
      return print_json(&out);
   }
   println!(
      "{} {} verified, {} mismatched, {} errored, {} skipped",
      style(ty).bold(),
      style(out.succeeded).green(),
      style(out.mismatched).red(),
      style(out.errored).yellow(),
      out.skipped
   );
   if out.timed_out > 0 || out.reverify_queued > 0 {
      println!(
         "{}",
         style(format!("{} timed out, {} queued for reverification", out.timed_out, out.reverify_queued))
            .dim()
      );
   }
   let left = service.remaining_verification_batch_count(100).await?;
   if left > 0 {
      println!("{}", style(format!("about {left} batches left")).dim());
   }
   Ok(())
}

/// Turns verification off for one registry, or back on as pending.
pub async fn set_enabled(
   data_dir: &Path,
   ty: ReplicableType,
   model_id: ModelId,
   enabled: bool,
   json: bool,
) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   let row = ws
      .registries
      .update(ty, model_id, &|r: &mut Registry| {
         if enabled {
            r.enable_verification();
         } else {
            r.disable_verification();
         }
         Ok(())
      })
      .await?;
   ws.persist()?;

   if json {
      return print_json(&row);
   }
   println!(
      "{} registry for model {model_id}: {}",
      capitalize(ty.human_name()),
      style(row.verification_state.as_str()).cyan()
   );
   Ok(())
}
