//! Single-registry resync and reverify.

use std::path::Path;

use console::style;

use crate::{
   Result,
   admin::RegistryStateTransition,
   cmd::{Workspace, print_json},
   error::Error,
   types::{ModelId, ReplicableType},
};

pub async fn execute(
   data_dir: &Path,
   ty: ReplicableType,
   model_id: ModelId,
   action: &str,
   json: bool,
) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   let transition = RegistryStateTransition::new(ws.registries.clone(), ws.scheduler.clone());
   let result = transition.execute(ty, model_id, action).await;
   ws.persist()?;

   if json {
      print_json(&result)?;
   } else if result.success {
      println!("{} {}", style("✓").green(), result.message);
   } else {
      println!("{} {}", style("✗").red(), result.message);
      for error in &result.errors {
         println!("  {}", style(error).dim());
      }
   }

   if result.success {
      Ok(())
   } else {
      Err(Error::Reported { op: "registry action" })
   }
}
