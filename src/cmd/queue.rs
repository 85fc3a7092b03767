//! Lists jobs waiting in the outgoing queue.

use std::path::Path;

use console::style;

use crate::{
   Result,
   cmd::{Workspace, print_json},
   scheduler::Job,
};

pub fn execute(data_dir: &Path, json: bool) -> Result<()> {
   let ws = Workspace::open_read_only(data_dir)?;
   let jobs = ws.scheduler.pending()?;
   if json {
      return print_json(&jobs);
   }
   if jobs.is_empty() {
      println!("{}", style("Queue is empty").dim());
      return Ok(());
   }
   for job in &jobs {
      let (kind, ty, id) = match job {
         Job::Sync { replicable_type, model_id } => ("sync", replicable_type, model_id),
         Job::Verification { replicable_type, model_id } => ("verify", replicable_type, model_id),
      };
      println!("  {:<8} {ty} {}", style(kind).cyan(), style(id).bold());
   }
   println!("{}", style(format!("{} jobs in {}", jobs.len(), ws.scheduler.path().display())).dim());
   Ok(())
}
