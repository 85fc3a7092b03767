//! Persisted cursor inspection and override.

use std::path::Path;

use console::style;

use crate::{
   Result,
   cmd::{Workspace, print_json},
   cursor::CursorStore,
};

pub fn show(data_dir: &Path, json: bool) -> Result<()> {
   let ws = Workspace::open_read_only(data_dir)?;
   let entries = ws.cursors.entries();
   if json {
      return print_json(&entries.into_iter().collect::<std::collections::BTreeMap<_, _>>());
   }
   if entries.is_empty() {
      println!("{}", style("No cursors set").dim());
   }
   for (key, value) in entries {
      println!("{key} {}", style(value).cyan());
   }
   Ok(())
}

pub async fn set(data_dir: &Path, key: &str, value: u64) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   ws.cursors.set(key, value).await?;
   println!("{} {key} = {value}", style("set").green());
   Ok(())
}

pub async fn reset(data_dir: &Path, key: &str) -> Result<()> {
   let ws = Workspace::open(data_dir)?;
   ws.cursors.clear(key).await?;
   println!("{} {key}", style("reset").green());
   Ok(())
}
