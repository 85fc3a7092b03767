//! Removes an object's local copy and its registry.

use std::{path::Path, sync::Arc};

use console::style;

use crate::{
   Result,
   clock::SystemClock,
   cmd::Workspace,
   config,
   lease::FileLease,
   removal::{FileSystemStorage, RegistryRemovalService, RemovalOutcome},
   types::{ModelId, ReplicableType},
};

pub async fn execute(data_dir: &Path, ty: ReplicableType, model_id: ModelId) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   let service = RegistryRemovalService::new(
      ws.registries.clone(),
      Arc::new(FileLease::new(ws.lease_dir(), Arc::new(SystemClock))),
      Arc::new(FileSystemStorage::new(ws.objects_dir())),
      config::get(),
   );

   let outcome = service.execute(ty, model_id).await?;
   ws.persist()?;

   match outcome {
      RemovalOutcome::LeaseTaken => {
         println!("{}", style(format!("{ty} {model_id} is locked by another worker")).yellow());
      },
      RemovalOutcome::Removed { local_copy, registry } => {
         println!(
            "{} {ty} {model_id} {}",
            style("removed").green(),
            style(format!(
               "(local copy: {}, registry: {})",
               if local_copy { "deleted" } else { "absent" },
               if registry { "deleted" } else { "absent" }
            ))
            .dim()
         );
      },
   }
   Ok(())
}
