use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Primary-side identifier of a replicable object.
pub type ModelId = u64;

/// Store-assigned identifier of a registry row, ascending in insertion order.
pub type RegistryId = u64;

/// Kind of object replicated from the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicableType {
   Repository,
   Wiki,
   Upload,
   LfsObject,
   ContainerRepository,
   MergeRequestDiff,
   SnippetRepository,
   PagesDeployment,
}

impl ReplicableType {
   pub const ALL: [Self; 8] = [
      Self::Repository,
      Self::Wiki,
      Self::Upload,
      Self::LfsObject,
      Self::ContainerRepository,
      Self::MergeRequestDiff,
      Self::SnippetRepository,
      Self::PagesDeployment,
   ];

   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Repository => "repository",
         Self::Wiki => "wiki",
         Self::Upload => "upload",
         Self::LfsObject => "lfs_object",
         Self::ContainerRepository => "container_repository",
         Self::MergeRequestDiff => "merge_request_diff",
         Self::SnippetRepository => "snippet_repository",
         Self::PagesDeployment => "pages_deployment",
      }
   }

   /// Human-readable name, used in failure messages.
   pub const fn human_name(self) -> &'static str {
      match self {
         Self::Repository => "repository",
         Self::Wiki => "wiki",
         Self::Upload => "upload",
         Self::LfsObject => "LFS object",
         Self::ContainerRepository => "container repository",
         Self::MergeRequestDiff => "merge request diff",
         Self::SnippetRepository => "snippet repository",
         Self::PagesDeployment => "pages deployment",
      }
   }
}

impl fmt::Display for ReplicableType {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

impl FromStr for ReplicableType {
   type Err = Error;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      Self::ALL
         .into_iter()
         .find(|ty| ty.as_str() == s)
         .ok_or_else(|| Error::UnknownReplicableType(s.to_string()))
   }
}

/// Capitalizes the first character of a message fragment.
pub(crate) fn capitalize(s: &str) -> String {
   let mut chars = s.chars();
   match chars.next() {
      Some(first) => first.to_uppercase().chain(chars).collect(),
      None => String::new(),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_every_type_name() {
      for ty in ReplicableType::ALL {
         assert_eq!(ty.as_str().parse::<ReplicableType>().expect("parse"), ty);
      }
   }

   #[test]
   fn rejects_unknown_name() {
      assert!(matches!(
         "job_artifact".parse::<ReplicableType>(),
         Err(Error::UnknownReplicableType(name)) if name == "job_artifact"
      ));
   }

   #[test]
   fn serde_names_match_display() {
      let json = serde_json::to_string(&ReplicableType::LfsObject).expect("serialize");
      assert_eq!(json, "\"lfs_object\"");
   }

   #[test]
   fn capitalize_first_letter() {
      assert_eq!(capitalize("wiki"), "Wiki");
      assert_eq!(capitalize("LFS object"), "LFS object");
      assert_eq!(capitalize(""), "");
   }
}
