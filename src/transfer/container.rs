//! Container image replication between two registries.
//!
//! Tags are compared by digest. For every tag that is missing or different on
//! the secondary, the primary manifest is fetched raw, every blob it references
//! is copied if absent, nested manifests of an index are handled first, and the
//! raw manifest bytes are pushed unchanged so digests stay identical. Tags that
//! only exist on the secondary are deleted.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use serde::Deserialize;
use thiserror::Error;

use super::{Transfer, TransferRequest, TransferResult};
use crate::{
   Result,
   types::{ModelId, ReplicableType},
};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";

/// Media types an index entry may carry when it points at another manifest.
/// Any other entry (for example buildkit cache layers) is a plain blob.
const MANIFEST_MEDIA_TYPES: [&str; 5] =
   [DOCKER_MANIFEST_V2, DOCKER_MANIFEST_LIST, OCI_MANIFEST, OCI_INDEX, OCI_ARTIFACT_MANIFEST];

#[derive(Debug, Error)]
pub enum ContainerError {
   #[error("registry request {op} {reference} failed: {reason}")]
   Request { op: &'static str, reference: String, reason: String },

   #[error("manifest {reference} is not valid JSON: {source}")]
   InvalidManifest {
      reference: String,
      #[source]
      source:    serde_json::Error,
   },

   #[error("manifest {reference} nests deeper than {max_depth} levels")]
   TooDeep { reference: String, max_depth: usize },
}

/// Manifest exactly as the registry served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
   pub body:       Bytes,
   /// `Content-Type` reported by the registry, when it sent one.
   pub media_type: Option<String>,
}

/// One registry endpoint. The sync holds a client for each site.
#[async_trait]
pub trait ContainerRegistryClient: Send + Sync {
   /// Tag name → manifest digest.
   async fn tags(&self, repository: &str) -> Result<BTreeMap<String, String>, ContainerError>;

   async fn manifest(&self, repository: &str, reference: &str)
   -> Result<RawManifest, ContainerError>;

   async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool, ContainerError>;

   async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Bytes, ContainerError>;

   async fn push_blob(
      &self,
      repository: &str,
      digest: &str,
      data: Bytes,
   ) -> Result<(), ContainerError>;

   async fn push_manifest(
      &self,
      repository: &str,
      reference: &str,
      body: Bytes,
      media_type: &str,
   ) -> Result<(), ContainerError>;

   async fn delete_tag(
      &self,
      repository: &str,
      tag: &str,
      digest: &str,
   ) -> Result<(), ContainerError>;
}

/// Resolves a container repository id to its registry path. `None` means the
/// repository no longer exists on the primary.
pub trait RepositoryPaths: Send + Sync {
   fn repository_path(&self, model_id: ModelId) -> Option<String>;
}

impl RepositoryPaths for BTreeMap<ModelId, String> {
   fn repository_path(&self, model_id: ModelId) -> Option<String> {
      self.get(&model_id).cloned()
   }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
   #[serde(default)]
   media_type: Option<String>,
   digest:     String,
   #[serde(default)]
   urls:       Vec<String>,
}

impl Descriptor {
   fn is_manifest(&self) -> bool {
      self
         .media_type
         .as_deref()
         .is_some_and(|mt| MANIFEST_MEDIA_TYPES.contains(&mt))
   }

   /// Foreign layers are served from their `urls`, never from the registry.
   fn is_foreign(&self) -> bool {
      !self.urls.is_empty()
   }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDoc {
   #[serde(default)]
   media_type: Option<String>,
   #[serde(default)]
   config:     Option<Descriptor>,
   #[serde(default)]
   layers:     Vec<Descriptor>,
   #[serde(default)]
   blobs:      Vec<Descriptor>,
   #[serde(default)]
   manifests:  Vec<Descriptor>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerSyncReport {
   pub tags_synced:  usize,
   pub tags_removed: usize,
   pub blobs_copied: usize,
   pub bytes_copied: u64,
}

const MAX_MANIFEST_DEPTH: usize = 4;

pub struct ContainerRepositorySync {
   primary:   Arc<dyn ContainerRegistryClient>,
   secondary: Arc<dyn ContainerRegistryClient>,
   paths:     Arc<dyn RepositoryPaths>,
}

impl ContainerRepositorySync {
   pub fn new(
      primary: Arc<dyn ContainerRegistryClient>,
      secondary: Arc<dyn ContainerRegistryClient>,
      paths: Arc<dyn RepositoryPaths>,
   ) -> Self {
      Self { primary, secondary, paths }
   }

   /// Brings the secondary copy of `repository` in line with the primary.
   pub async fn sync_repository(
      &self,
      repository: &str,
   ) -> Result<ContainerSyncReport, ContainerError> {
      let primary_tags = self.primary.tags(repository).await?;
      let secondary_tags = self.secondary.tags(repository).await?;
      let mut report = ContainerSyncReport::default();

      for (tag, digest) in &primary_tags {
         if secondary_tags.get(tag) == Some(digest) {
            continue;
         }
         self.sync_manifest(repository, tag.clone(), 0, &mut report).await?;
         report.tags_synced += 1;
      }

      for (tag, digest) in &secondary_tags {
         if !primary_tags.contains_key(tag) {
            self.secondary.delete_tag(repository, tag, digest).await?;
            report.tags_removed += 1;
         }
      }

      Ok(report)
   }

   fn sync_manifest<'a>(
      &'a self,
      repository: &'a str,
      reference: String,
      depth: usize,
      report: &'a mut ContainerSyncReport,
   ) -> BoxFuture<'a, Result<(), ContainerError>> {
      async move {
         if depth > MAX_MANIFEST_DEPTH {
            return Err(ContainerError::TooDeep {
               reference,
               max_depth: MAX_MANIFEST_DEPTH,
            });
         }

         let raw = self.primary.manifest(repository, &reference).await?;
         let doc: ManifestDoc = match serde_json::from_slice(&raw.body) {
            Ok(doc) => doc,
            Err(source) => return Err(ContainerError::InvalidManifest { reference, source }),
         };

         for entry in &doc.manifests {
            if entry.is_manifest() {
               self
                  .sync_manifest(repository, entry.digest.clone(), depth + 1, report)
                  .await?;
            } else {
               self.copy_blob(repository, entry, report).await?;
            }
         }

         let blobs = doc.config.iter().chain(&doc.layers).chain(&doc.blobs);
         for blob in blobs {
            self.copy_blob(repository, blob, report).await?;
         }

         let media_type = raw
            .media_type
            .as_deref()
            .or(doc.media_type.as_deref())
            .unwrap_or(OCI_MANIFEST)
            .to_string();
         self
            .secondary
            .push_manifest(repository, &reference, raw.body, &media_type)
            .await
      }
      .boxed()
   }

   async fn copy_blob(
      &self,
      repository: &str,
      blob: &Descriptor,
      report: &mut ContainerSyncReport,
   ) -> Result<(), ContainerError> {
      if blob.is_foreign() || self.secondary.blob_exists(repository, &blob.digest).await? {
         return Ok(());
      }
      let data = self.primary.pull_blob(repository, &blob.digest).await?;
      report.bytes_copied += data.len() as u64;
      report.blobs_copied += 1;
      self.secondary.push_blob(repository, &blob.digest, data).await
   }
}

#[async_trait]
impl Transfer for ContainerRepositorySync {
   async fn attempt(&self, request: &TransferRequest) -> Result<TransferResult> {
      debug_assert_eq!(request.replicable_type, ReplicableType::ContainerRepository);
      let Some(repository) = self.paths.repository_path(request.model_id) else {
         return Ok(TransferResult::missing_on_primary("container repository not found on primary"));
      };

      let start = Instant::now();
      let report = self.sync_repository(&repository).await?;
      tracing::info!(
         repository = %repository,
         tags_synced = report.tags_synced,
         tags_removed = report.tags_removed,
         blobs_copied = report.blobs_copied,
         elapsed_secs = start.elapsed().as_secs_f64(),
         "container repository synced"
      );
      Ok(TransferResult::succeeded(report.bytes_copied))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn manifest_without_media_type_parses() {
      let doc: ManifestDoc = serde_json::from_str(
         r#"{"schemaVersion":2,"layers":[{"mediaType":"application/vnd.oci.image.layer.v1.tar+gzip","size":3333,"digest":"sha256:3333"}]}"#,
      )
      .expect("parse");
      assert!(doc.media_type.is_none());
      assert_eq!(doc.layers.len(), 1);
   }

   #[test]
   fn index_entries_are_classified_by_media_type() {
      let doc: ManifestDoc = serde_json::from_str(
         r#"{"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[
            {"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"sha256:6666"},
            {"mediaType":"application/vnd.buildkit.cacheconfig.v0","digest":"sha256:4444"}]}"#,
      )
      .expect("parse");
      assert!(doc.manifests[0].is_manifest());
      assert!(!doc.manifests[1].is_manifest());
   }

   #[test]
   fn foreign_layers_are_recognized() {
      let layer: Descriptor = serde_json::from_str(
         r#"{"mediaType":"application/vnd.docker.image.rootfs.foreign.diff.tar.gzip","digest":"sha256:5555","urls":["https://foo.bar/blob"]}"#,
      )
      .expect("parse");
      assert!(layer.is_foreign());
   }
}
