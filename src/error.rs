//! Error types for media-dl
//!
//! This module provides the error taxonomy for the library:
//! - Request errors — job or discovery creation rejected by the server
//! - Transport errors — push channel handshake/drop/decode failures
//! - Delivery errors — local artifact placement failures (soft, non-fatal)
//! - Store errors — local SQLite persistence failures
//!
//! Only request and transport errors terminate a job's state machine; delivery
//! and store failures are logged and reported without failing the job.

use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "server.base_url")
        key: Option<String>,
    },

    /// Job or discovery request rejected by the server
    #[error("request error: {0}")]
    Request(#[from] RequestError),

    /// Push channel transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local artifact placement failure
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Local store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation attempted in a state that does not permit it
    #[error("cannot {operation} while job is {state}")]
    InvalidState {
        /// The operation that was attempted (e.g., "start", "cancel")
        operation: String,
        /// The controller state that prevents it (e.g., "done", "cancelled")
        state: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Request errors — job/discovery creation rejected
///
/// These surface immediately to the caller as a creation failure. Per the
/// source system's semantics they are never retried automatically.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Server rejected the request with an HTTP error status
    #[error("server rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status code returned by the server
        status: u16,
        /// Server-provided error detail (empty if none)
        message: String,
    },

    /// Server response body could not be decoded
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),

    /// Request could not be sent at all
    #[error("failed to reach server: {0}")]
    Unreachable(String),
}

/// Transport errors on the progress push channel
///
/// Any of these is terminal for the affected job. The channel is closed and
/// the error is reported to the registered observer exactly once; the client
/// never reconnects on its own.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// Channel handshake failed (non-2xx response)
    #[error("progress channel handshake failed with status {status}")]
    HandshakeFailed {
        /// HTTP status code returned on the channel request
        status: u16,
    },

    /// Connection dropped mid-stream
    #[error("progress channel dropped: {0}")]
    ConnectionDropped(String),

    /// An inbound message failed to parse as a progress event
    #[error("undecodable progress message: {0}")]
    Decode(String),
}

/// Delivery errors — local placement of a finished artifact failed
///
/// A delivery failure is not a job failure: the artifact remains fetchable
/// through history, so these are surfaced as soft warnings.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Fetching the artifact bytes from the server failed
    #[error("failed to fetch artifact {artifact_id}: {reason}")]
    FetchFailed {
        /// The artifact that could not be fetched
        artifact_id: String,
        /// Why the fetch failed
        reason: String,
    },

    /// Writing the artifact to disk failed
    #[error("failed to write {filename}: {reason}")]
    WriteFailed {
        /// The derived filename being written
        filename: String,
        /// Why the write failed
        reason: String,
    },
}

/// Local store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open or create the store database
    #[error("failed to open store: {0}")]
    OpenFailed(String),

    /// Failed to (re)create the store schema
    #[error("failed to migrate store: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A persisted record could not be decoded
    #[error("corrupt record under key {key}: {reason}")]
    CorruptRecord {
        /// The fixed key the record lives under
        key: String,
        /// Why decoding failed
        reason: String,
    },
}

impl Error {
    /// True if this error terminates a job's state machine
    ///
    /// Request and transport failures are fatal for the job; delivery and
    /// store failures are accumulated and reported without changing job state.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, Error::Request(_) | Error::Transport(_))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_and_transport_errors_are_job_fatal() {
        let req = Error::Request(RequestError::Rejected {
            status: 403,
            message: "premium required".to_string(),
        });
        assert!(req.is_job_fatal(), "rejected requests must fail the job");

        let transport = Error::Transport(TransportError::ConnectionDropped(
            "connection reset".to_string(),
        ));
        assert!(transport.is_job_fatal(), "channel drops must fail the job");
    }

    #[test]
    fn delivery_and_store_errors_are_not_job_fatal() {
        let delivery = Error::Delivery(DeliveryError::WriteFailed {
            filename: "clip.mp4".to_string(),
            reason: "disk full".to_string(),
        });
        assert!(
            !delivery.is_job_fatal(),
            "a delivery failure is a soft warning, not a job failure"
        );

        let store = Error::Store(StoreError::QueryFailed("locked".to_string()));
        assert!(!store.is_job_fatal());
    }

    #[test]
    fn error_display_includes_context() {
        let err = Error::Request(RequestError::Rejected {
            status: 429,
            message: "rate limited".to_string(),
        });
        let msg = err.to_string();
        assert!(msg.contains("429"), "status code should appear: {msg}");
        assert!(msg.contains("rate limited"), "detail should appear: {msg}");
    }

    #[test]
    fn decode_failure_formats_as_transport_error() {
        let err = Error::Transport(TransportError::Decode("expected object".to_string()));
        assert!(
            err.to_string().contains("undecodable"),
            "parse failures are transport errors, not silent drops"
        );
    }

    #[test]
    fn invalid_state_message_names_operation_and_state() {
        let err = Error::InvalidState {
            operation: "start".to_string(),
            state: "cancelled".to_string(),
        };
        assert_eq!(err.to_string(), "cannot start while job is cancelled");
    }
}
