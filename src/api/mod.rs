//! Server API layer
//!
//! The remote extraction service is specified here as an abstract contract
//! ([`MediaServer`]) so the controller, delivery engine, and selection manager
//! can be exercised against in-memory fakes. [`HttpMediaServer`] is the
//! concrete HTTP binding.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{Result, TransportError};
use crate::types::{JobHandle, JobId, JobRequest, SelectableItem};

mod http;

pub use http::HttpMediaServer;

/// Chunked artifact byte stream
pub type ByteStream = BoxStream<'static, std::result::Result<Vec<u8>, std::io::Error>>;

/// Raw progress push channel: one item per SSE `data:` payload
///
/// The transport framing (event-stream parsing) is handled below this layer;
/// consumers receive the JSON payload strings and decode them into
/// [`crate::types::ProgressEvent`]s. The stream ends when the server closes
/// the channel.
pub type ProgressChannel = BoxStream<'static, std::result::Result<String, TransportError>>;

/// A finished artifact fetched from the server
pub struct ArtifactResponse {
    /// Declared content type (e.g. "video/mp4")
    pub content_type: String,
    /// Filename embedded in the server's response metadata, percent-decoded
    /// when RFC 5987 encoded
    pub filename_hint: Option<String>,
    /// Artifact bytes, streamed
    pub stream: ByteStream,
}

impl std::fmt::Debug for ArtifactResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactResponse")
            .field("content_type", &self.content_type)
            .field("filename_hint", &self.filename_hint)
            .finish_non_exhaustive()
    }
}

/// One page of discoverable items from a profile/channel
#[derive(Clone, Debug)]
pub struct DiscoveryPage {
    /// Items on this page
    pub items: Vec<SelectableItem>,
    /// True if another page may follow
    pub has_more: bool,
}

/// Contract consumed from the remote media extraction service
///
/// All methods are plain request/response except
/// [`open_progress_channel`](MediaServer::open_progress_channel), which
/// returns a one-way push stream terminated by the server after a `done` or
/// `error` event.
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Initiate a single or batch job; returns the server-assigned handle
    async fn create_job(&self, request: &JobRequest) -> Result<JobHandle>;

    /// Request cancellation of a job
    ///
    /// Best-effort at every call site: the controller ignores failures.
    async fn cancel_job(&self, job_id: &JobId) -> Result<()>;

    /// Open the progress push channel for a job
    async fn open_progress_channel(&self, handle: &JobHandle) -> Result<ProgressChannel>;

    /// Fetch a finished artifact as a byte stream plus metadata
    async fn fetch_artifact(&self, artifact_id: &str) -> Result<ArtifactResponse>;

    /// Load one page of discoverable items for a profile/channel URL
    async fn discover(&self, query: &str, limit: usize, offset: usize) -> Result<DiscoveryPage>;
}
