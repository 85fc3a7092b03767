//! Secondary-site replication core.
//!
//! Tracks one [`registry::Registry`] row per replicable object, drives it
//! through sync and verification state machines, keeps the registry set in
//! line with the replicable set, and exposes bulk and single-object admin
//! transitions. Transport, storage and scheduling are collaborators behind
//! traits.

pub mod admin;
pub mod backoff;
pub mod bulk;
pub mod checksum;
pub mod clock;
pub mod cmd;
pub mod config;
pub mod consistency;
pub mod cursor;
pub mod data_lock;
pub mod error;
pub mod housekeeping;
pub mod lease;
pub mod registry;
pub mod removal;
pub mod replicable;
pub mod scheduler;
pub mod status;
pub mod sync;
pub mod transfer;
pub mod types;
pub mod updates;
pub mod util;
pub mod verification;

pub use error::{Error, Result};
pub use types::{ModelId, RegistryId, ReplicableType};
