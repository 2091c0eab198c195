//! Artifact delivery: streamed writes into the capability directory, with a
//! conventional fallback download.
//!
//! Every delivery tries the user-granted capability directory first. Any
//! failure on that path, including a missing or denied capability, falls
//! through to the configured fallback directory. Both paths write chunks as
//! they arrive; artifacts can be multi-gigabyte videos and are never
//! buffered whole. Delivery never surfaces a capability problem to the
//! caller; only the fallback path can fail the delivery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::api::{ArtifactResponse, MediaServer};
use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};
use crate::store::{Permission, Store};
use crate::types::ItemDelivery;

mod filename;

use filename::derive_filename;

/// How an artifact's bytes reached disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMethod {
    /// Written into the user-granted capability directory
    DirectWrite,
    /// Written into the fallback directory after the capability path was
    /// unavailable or failed
    Fallback,
}

impl DeliveryMethod {
    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::DirectWrite => "direct",
            DeliveryMethod::Fallback => "fallback",
        }
    }

    /// Inverse of [`as_str`](Self::as_str)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(DeliveryMethod::DirectWrite),
            "fallback" => Some(DeliveryMethod::Fallback),
            _ => None,
        }
    }
}

/// Proof of a completed delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Artifact the bytes came from
    pub artifact_id: String,
    /// Filename the artifact was written under
    pub filename: String,
    /// Full path of the written file
    pub path: PathBuf,
    /// Which path the bytes took
    pub method: DeliveryMethod,
}

/// Moves completed artifacts from the server onto local disk
pub struct DeliveryEngine {
    server: Arc<dyn MediaServer>,
    store: Arc<Store>,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    /// Create an engine backed by the given server and capability store
    pub fn new(server: Arc<dyn MediaServer>, store: Arc<Store>, config: DeliveryConfig) -> Self {
        Self {
            server,
            store,
            config,
        }
    }

    /// Deliver one artifact to disk
    ///
    /// Tries the capability directory first; any failure there downgrades to
    /// the fallback directory. Only a fallback failure is returned as an
    /// error.
    pub async fn deliver(&self, item: &ItemDelivery) -> Result<DeliveryReceipt> {
        if let Some(capability) = self.load_capability_soft().await {
            match capability.verify().await {
                Permission::Granted => match self.direct_write(item, &capability.path).await {
                    Ok(receipt) => {
                        tracing::info!(
                            artifact_id = %item.artifact_id,
                            filename = %receipt.filename,
                            "Delivered artifact via direct write"
                        );
                        return Ok(receipt);
                    }
                    Err(e) => {
                        tracing::warn!(
                            artifact_id = %item.artifact_id,
                            error = %e,
                            "Direct-write delivery failed, falling back"
                        );
                    }
                },
                Permission::Denied => {
                    tracing::debug!(
                        artifact_id = %item.artifact_id,
                        "Capability denied, using fallback delivery"
                    );
                }
            }
        }

        let receipt = self.fallback_write(item).await?;
        tracing::info!(
            artifact_id = %item.artifact_id,
            filename = %receipt.filename,
            "Delivered artifact via fallback"
        );
        Ok(receipt)
    }

    /// Load the stored capability; a load failure behaves like no capability
    async fn load_capability_soft(&self) -> Option<crate::store::DirectoryCapability> {
        match self.store.load_capability().await {
            Ok(capability) => capability,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load directory capability");
                None
            }
        }
    }

    /// Stream the artifact into the capability directory
    async fn direct_write(&self, item: &ItemDelivery, dir: &Path) -> Result<DeliveryReceipt> {
        self.write_artifact(item, dir, DeliveryMethod::DirectWrite)
            .await
    }

    /// Stream the artifact into the fallback directory, creating it if needed
    async fn fallback_write(&self, item: &ItemDelivery) -> Result<DeliveryReceipt> {
        tokio::fs::create_dir_all(&self.config.fallback_dir)
            .await
            .map_err(|e| DeliveryError::WriteFailed {
                filename: self.config.fallback_dir.display().to_string(),
                reason: e.to_string(),
            })?;

        self.write_artifact(item, &self.config.fallback_dir, DeliveryMethod::Fallback)
            .await
    }

    /// Fetch the artifact and stream it into `dir` chunk by chunk
    ///
    /// A partial file left behind by a failure is removed best-effort.
    async fn write_artifact(
        &self,
        item: &ItemDelivery,
        dir: &Path,
        method: DeliveryMethod,
    ) -> Result<DeliveryReceipt> {
        let artifact = self.server.fetch_artifact(&item.artifact_id).await?;
        let filename = self.filename_for(item, &artifact);
        let path = dir.join(&filename);

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            DeliveryError::WriteFailed {
                filename: filename.clone(),
                reason: e.to_string(),
            }
        })?;

        if let Err(e) = copy_stream(artifact, &mut file, item, &filename).await {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        Ok(DeliveryReceipt {
            artifact_id: item.artifact_id.clone(),
            filename,
            path,
            method,
        })
    }

    fn filename_for(&self, item: &ItemDelivery, artifact: &ArtifactResponse) -> String {
        derive_filename(
            artifact.filename_hint.as_deref(),
            &item.suggested_title,
            &item.artifact_id,
            &artifact.content_type,
        )
    }
}

async fn copy_stream(
    mut artifact: ArtifactResponse,
    file: &mut tokio::fs::File,
    item: &ItemDelivery,
    filename: &str,
) -> Result<()> {
    while let Some(chunk) = artifact.stream.next().await {
        let chunk = chunk.map_err(|e| DeliveryError::FetchFailed {
            artifact_id: item.artifact_id.clone(),
            reason: e.to_string(),
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DeliveryError::WriteFailed {
                filename: filename.to_string(),
                reason: e.to_string(),
            })?;
    }

    file.flush().await.map_err(|e| DeliveryError::WriteFailed {
        filename: filename.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}
