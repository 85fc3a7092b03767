use std::path::PathBuf;

use clap::{Parser, Subcommand};
use geosync::{
   Error, Result,
   cmd::{self, bulk::BulkKind},
   config,
   types::{ModelId, ReplicableType},
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for geosync
#[derive(Parser)]
#[command(name = "geosync")]
#[command(about = "Secondary-site registry sync, verification and reconciliation")]
#[command(version)]
struct Cli {
   #[arg(long, env = "GEOSYNC_DATA_DIR", help = "Data directory (default: ~/.geosync/data)")]
   data_dir: Option<PathBuf>,

   #[arg(long, global = true, help = "JSON output")]
   json: bool,

   #[command(subcommand)]
   command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Show sync and verification tallies per type")]
   Status {
      #[arg(short = 't', long = "type", help = "Only this replicable type")]
      ty: Option<ReplicableType>,
   },

   #[command(about = "Create missing and delete unused registries")]
   Reconcile {
      #[arg(short = 't', long = "type", help = "Only this replicable type")]
      ty: Option<ReplicableType>,

      #[arg(long, default_value = "100", help = "Maximum passes per type")]
      max_passes: usize,
   },

   #[command(name = "bulk-resync", about = "Mark every registry of a type for resync")]
   BulkResync {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long, default_value = "1000", help = "Stop after this many batches")]
      max_batches: usize,
   },

   #[command(name = "bulk-reverify", about = "Mark every verified registry of a type for reverification")]
   BulkReverify {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long, default_value = "1000", help = "Stop after this many batches")]
      max_batches: usize,
   },

   #[command(about = "Resync one registry")]
   Resync {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long)]
      id: ModelId,
   },

   #[command(about = "Reverify one registry")]
   Reverify {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long)]
      id: ModelId,
   },

   #[command(about = "Verify one object, or run a verification round for a type")]
   Verify {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long)]
      id: Option<ModelId>,
   },

   #[command(name = "disable-verification", about = "Stop verifying one registry")]
   DisableVerification {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long)]
      id: ModelId,
   },

   #[command(name = "enable-verification", about = "Resume verifying one registry")]
   EnableVerification {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long)]
      id: ModelId,
   },

   #[command(about = "Delete an object's local copy and its registry")]
   Remove {
      #[arg(short = 't', long = "type")]
      ty: ReplicableType,

      #[arg(long)]
      id: ModelId,
   },

   #[command(about = "List jobs waiting in the queue")]
   Queue,

   #[command(about = "Inspect or override persisted cursors")]
   Cursor {
      #[command(subcommand)]
      command: CursorCmd,
   },
}

#[derive(Subcommand)]
enum CursorCmd {
   #[command(about = "List cursors")]
   Show,

   #[command(about = "Set a cursor")]
   Set { key: String, value: u64 },

   #[command(about = "Reset a cursor to the beginning")]
   Reset { key: String },
}

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
      .init();

   let cli = Cli::parse();
   if let Err(err) = run(cli).await {
      if !matches!(err, Error::Reported { .. }) {
         eprintln!("{err}");
      }
      std::process::exit(err.exit_code());
   }
}

async fn run(cli: Cli) -> Result<()> {
   config::get().validate()?;
   let data_dir = cli.data_dir.unwrap_or_else(|| config::data_dir().clone());
   let data_dir = data_dir.as_path();
   let json = cli.json;

   match cli.command {
      Cmd::Status { ty } => cmd::status::execute(data_dir, ty, json).await,
      Cmd::Reconcile { ty, max_passes } => {
         cmd::reconcile::execute(data_dir, ty, max_passes, json).await
      },
      Cmd::BulkResync { ty, max_batches } => {
         cmd::bulk::execute(data_dir, BulkKind::Resync, ty, max_batches, json).await
      },
      Cmd::BulkReverify { ty, max_batches } => {
         cmd::bulk::execute(data_dir, BulkKind::Reverify, ty, max_batches, json).await
      },
      Cmd::Resync { ty, id } => cmd::action::execute(data_dir, ty, id, "resync", json).await,
      Cmd::Reverify { ty, id } => cmd::action::execute(data_dir, ty, id, "reverify", json).await,
      Cmd::Verify { ty, id } => cmd::verify::execute(data_dir, ty, id, json).await,
      Cmd::DisableVerification { ty, id } => {
         cmd::verify::set_enabled(data_dir, ty, id, false, json).await
      },
      Cmd::EnableVerification { ty, id } => {
         cmd::verify::set_enabled(data_dir, ty, id, true, json).await
      },
      Cmd::Remove { ty, id } => cmd::remove::execute(data_dir, ty, id).await,
      Cmd::Queue => cmd::queue::execute(data_dir, json),
      Cmd::Cursor { command } => match command {
         CursorCmd::Show => cmd::cursor::show(data_dir, json),
         CursorCmd::Set { key, value } => cmd::cursor::set(data_dir, &key, value).await,
         CursorCmd::Reset { key } => cmd::cursor::reset(data_dir, &key).await,
      },
   }
}
