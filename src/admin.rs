//! Single-object admin actions.

use std::{fmt, str::FromStr, sync::Arc};

use serde::Serialize;

use crate::{
   Result,
   error::Error,
   registry::{Registry, RegistryStore},
   scheduler::Scheduler,
   types::{ModelId, ReplicableType, capitalize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
   Resync,
   Reverify,
}

impl Action {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Resync => "resync",
         Self::Reverify => "reverify",
      }
   }
}

impl fmt::Display for Action {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

impl FromStr for Action {
   type Err = String;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "resync" => Ok(Self::Resync),
         "reverify" => Ok(Self::Reverify),
         other => Err(format!("Action '{other}' is not supported")),
      }
   }
}

/// Structured result meant to be rendered as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionResult {
   pub success: bool,
   pub message: String,
   pub errors:  Vec<String>,
}

impl TransitionResult {
   fn ok(message: String) -> Self {
      Self { success: true, message, errors: Vec::new() }
   }

   fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
      Self { success: false, message: message.into(), errors: vec![error.into()] }
   }
}

/// Resync or reverify one registry on request.
pub struct RegistryStateTransition {
   registries: Arc<dyn RegistryStore>,
   scheduler:  Arc<dyn Scheduler>,
}

impl RegistryStateTransition {
   pub fn new(registries: Arc<dyn RegistryStore>, scheduler: Arc<dyn Scheduler>) -> Self {
      Self { registries, scheduler }
   }

   pub async fn execute(
      &self,
      ty: ReplicableType,
      model_id: ModelId,
      action: &str,
   ) -> TransitionResult {
      let action = match action.parse::<Action>() {
         Ok(action) => action,
         Err(reason) => return TransitionResult::failed("Unsupported action", reason),
      };

      match self.apply(ty, model_id, action).await {
         Ok(()) => {
            tracing::info!(replicable_type = %ty, model_id, %action, "registry action enqueued");
            TransitionResult::ok(format!(
               "{} registry for model {model_id} scheduled for {action}",
               capitalize(ty.human_name())
            ))
         },
         Err(e @ Error::RegistryNotFound { .. }) => {
            TransitionResult::failed("Registry not found", e.to_string())
         },
         Err(e @ Error::InvalidTransition { .. }) => {
            TransitionResult::failed(format!("Could not {action} registry"), e.to_string())
         },
         Err(e) => {
            tracing::warn!(replicable_type = %ty, model_id, %action, "registry action failed: {e}");
            TransitionResult::failed(format!("Error while trying to {action} registry"), e.to_string())
         },
      }
   }

   async fn apply(&self, ty: ReplicableType, model_id: ModelId, action: Action) -> Result<()> {
      match action {
         Action::Resync => {
            self
               .registries
               .update(ty, model_id, &|r: &mut Registry| {
                  r.request_resync();
                  Ok(())
               })
               .await?;
            self.scheduler.enqueue_sync(ty, model_id).await
         },
         Action::Reverify => {
            self
               .registries
               .update(ty, model_id, &|r: &mut Registry| {
                  if r.verification_disabled() {
                     return Err(Error::InvalidTransition {
                        machine: "verification",
                        from:    r.verification_state.as_str(),
                        to:      "verification_pending",
                     });
                  }
                  r.reset_verification();
                  Ok(())
               })
               .await?;
            self.scheduler.enqueue_verification(ty, model_id).await
         },
      }
   }
}
