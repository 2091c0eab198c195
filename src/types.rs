//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Opaque, server-assigned identifier for one unit of work (single or batch)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new JobId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of server-side work a job represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// One media item
    Single,
    /// A batch of items downloaded sequentially server-side
    Batch,
}

/// Handle to one server-side job
///
/// Owned exclusively by the [`crate::controller::JobController`] that created
/// it; dropped when the job reaches a terminal state or is cancelled.
#[derive(Clone, Debug)]
pub struct JobHandle {
    /// Server-assigned job identifier
    pub id: JobId,
    /// Single or batch
    pub kind: JobKind,
    /// When the job was accepted by the server
    pub created_at: DateTime<Utc>,
}

/// Output container format requested for a job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    /// Video with merged audio (mp4)
    #[default]
    Mp4,
    /// Audio only (mp3)
    Mp3,
}

/// Requested output quality
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    /// Best available
    #[serde(rename = "best")]
    Best,
    /// 1080p or lower
    #[serde(rename = "1080p")]
    P1080,
    /// 720p or lower
    #[default]
    #[serde(rename = "720p")]
    P720,
    /// 480p or lower
    #[serde(rename = "480p")]
    P480,
}

/// A user-initiated download intent, single item or batch
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobRequest {
    /// One media item
    Single {
        /// Source URL to extract
        url: String,
        /// Output container format
        #[serde(default)]
        format: MediaFormat,
        /// Output quality
        #[serde(default)]
        quality: Quality,
    },
    /// A batch of items
    Batch {
        /// Source URLs, downloaded sequentially by the server
        #[serde(rename = "video_urls")]
        urls: Vec<String>,
        /// Output container format
        #[serde(default)]
        format: MediaFormat,
        /// Output quality
        #[serde(default)]
        quality: Quality,
    },
}

impl JobRequest {
    /// The kind of job this request creates
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Single { .. } => JobKind::Single,
            JobRequest::Batch { .. } => JobKind::Batch,
        }
    }
}

/// One discoverable media item in a collection
///
/// Created when a discovery page loads; never mutated; discarded when the
/// user resets the search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectableItem {
    /// Stable platform identifier for the item
    #[serde(rename = "video_id")]
    pub source_ref: String,
    /// Canonical URL used to request a job for this item
    pub url: String,
    /// Display title
    pub title: String,
    /// Thumbnail image URL, if the platform provides one
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Duration in seconds, if known
    #[serde(default, rename = "duration")]
    pub duration_seconds: Option<u64>,
}

/// Reference to one finished artifact ready for local placement
///
/// Unique per artifact: the same `artifact_id` must never be delivered twice
/// within one job's lifetime (enforced by the controller's seen-set).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDelivery {
    /// Opaque identifier used to fetch the artifact bytes
    #[serde(rename = "download_id")]
    pub artifact_id: String,
    /// Title suggested by the server for filename derivation
    #[serde(default, rename = "title")]
    pub suggested_title: String,
}

/// A batch sub-item that failed server-side
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Source reference (URL) of the item that failed
    #[serde(rename = "url")]
    pub source_ref: String,
    /// Server-provided failure reason
    #[serde(default, rename = "error")]
    pub error_message: String,
}

/// Batch-specific progress carried by a [`ProgressEvent`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Total number of items in the batch
    pub total_count: u64,
    /// Number of items the server has finished processing (success or failure)
    pub completed_count: u64,
    /// Title of the item currently being processed (empty between items)
    pub current_item_title: String,
    /// Progress of the current item (0–100)
    pub current_item_percent: f32,
    /// Artifacts finished so far; append-only across events, entries may repeat
    pub completed_items: Vec<ItemDelivery>,
    /// Items that failed server-side; each reported once by the server
    pub failed_items: Vec<FailedItem>,
}

impl BatchProgress {
    /// Number of items that actually succeeded, clamped at zero
    ///
    /// The server reports `completed_count` inclusive of failures. If it ever
    /// reports more failures than completions, the tally clamps to zero rather
    /// than going negative; [`Self::is_consistent`] exposes the discrepancy.
    pub fn succeeded_count(&self) -> u64 {
        self.completed_count
            .saturating_sub(self.failed_items.len() as u64)
    }

    /// False if the server reported more failures than completions
    pub fn is_consistent(&self) -> bool {
        self.failed_items.len() as u64 <= self.completed_count
    }
}

/// Job status pushed by the server — the closed discriminant of every
/// progress message
///
/// Anything other than `waiting`/`done`/`error` is an active phase name
/// (`downloading`, `converting`, ...), carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Job accepted but not started yet
    Waiting,
    /// Job in progress; the string is the server's phase label
    Active(String),
    /// Job finished successfully
    Done,
    /// Job failed server-side
    Error,
}

impl JobStatus {
    /// True for `done` and `error` — no further events follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Active(phase) => write!(f, "{phase}"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Immutable progress snapshot pushed by the server over the push channel
///
/// Decoded and validated at the boundary by [`ProgressEvent::from_json`];
/// undecodable payloads are transport errors, never silently dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    /// Current status
    pub status: JobStatus,
    /// Overall progress, 0–100; monotonic non-decreasing unless the job restarts
    pub percent: f32,
    /// Free-form phase label (e.g. "downloading", "converting")
    pub phase: String,
    /// Current transfer speed in bytes per second, if reported
    pub speed_bps: Option<u64>,
    /// Estimated seconds to completion, if reported
    pub eta_seconds: Option<u64>,
    /// Failure reason; present iff status is [`JobStatus::Error`]
    pub error_message: Option<String>,
    /// For single jobs: the finished artifact, carried on the `done` event
    pub item: Option<ItemDelivery>,
    /// For batch jobs: batch accounting
    pub batch: Option<BatchProgress>,
}

/// Wire shape of a push-channel message; loose on purpose, validated in
/// [`ProgressEvent::from_json`]
#[derive(Deserialize)]
struct RawEvent {
    status: String,
    #[serde(default)]
    progress: f32,
    #[serde(default)]
    phase: String,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    eta: Option<f64>,
    #[serde(default)]
    error: Option<String>,
    // Single-job terminal fields
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    download_id: Option<String>,
    // Batch fields
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    current_title: Option<String>,
    #[serde(default)]
    current_progress: Option<f32>,
    #[serde(default)]
    failed: Option<Vec<FailedItem>>,
    #[serde(default)]
    completed_downloads: Option<Vec<ItemDelivery>>,
}

impl ProgressEvent {
    /// Decode and validate one push-channel payload
    ///
    /// Returns a [`TransportError::Decode`] for anything that is not a JSON
    /// object with a non-empty string `status` field.
    pub fn from_json(payload: &str) -> Result<Self, TransportError> {
        let raw: RawEvent =
            serde_json::from_str(payload).map_err(|e| TransportError::Decode(e.to_string()))?;

        let status = match raw.status.as_str() {
            "" => return Err(TransportError::Decode("empty status field".to_string())),
            "waiting" => JobStatus::Waiting,
            "done" => JobStatus::Done,
            "error" => JobStatus::Error,
            phase => JobStatus::Active(phase.to_string()),
        };

        // Batch events always carry `total`; its presence discriminates them
        // from single-job events.
        let batch = raw.total.map(|total| BatchProgress {
            total_count: total,
            completed_count: raw.completed.unwrap_or(0),
            current_item_title: raw.current_title.unwrap_or_default(),
            current_item_percent: raw.current_progress.unwrap_or(0.0).clamp(0.0, 100.0),
            completed_items: raw.completed_downloads.unwrap_or_default(),
            failed_items: raw.failed.unwrap_or_default(),
        });

        let item = raw.download_id.map(|artifact_id| ItemDelivery {
            artifact_id,
            suggested_title: raw.title.clone().unwrap_or_default(),
        });

        let error_message = if status == JobStatus::Error {
            Some(
                raw.error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            )
        } else {
            None
        };

        Ok(ProgressEvent {
            status,
            percent: raw.progress.clamp(0.0, 100.0),
            phase: raw.phase,
            speed_bps: raw.speed.map(|s| s.max(0.0) as u64),
            eta_seconds: raw.eta.map(|e| e.max(0.0) as u64),
            error_message,
            item,
            batch,
        })
    }
}
