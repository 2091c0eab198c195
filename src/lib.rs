//! # media-dl
//!
//! Client library for a remote media extraction and download service.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Progress is pushed over a server channel, no polling
//! - **Local-first delivery** - Artifacts stream straight into a user-granted
//!   directory when possible, into a fallback directory when it is not
//! - **Sensible defaults** - Works out of the box with zero configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_dl::{Config, HttpMediaServer, JobController, JobRequest, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let server = Arc::new(HttpMediaServer::new(&config.server)?);
//!     let store = Arc::new(Store::open(&config.store.path).await?);
//!     let controller = JobController::new(server, store, &config);
//!
//!     // Subscribe to controller notifications
//!     let mut events = controller.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     controller
//!         .start(JobRequest::Single {
//!             url: "https://example.com/watch?v=abc".to_string(),
//!             format: Default::default(),
//!             quality: Default::default(),
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Server API contract and HTTP implementation
pub mod api;
/// Configuration types
pub mod config;
/// Job state machine
pub mod controller;
/// Artifact delivery to local disk
pub mod delivery;
/// Error types
pub mod error;
/// Push-channel progress client
pub mod progress;
/// Batch discovery and selection
pub mod selection;
/// Local persistence (capability and delivery history)
pub mod store;
/// Core types and wire formats
pub mod types;

// Re-export commonly used types
pub use api::{ArtifactResponse, DiscoveryPage, HttpMediaServer, MediaServer};
pub use config::{Config, DeliveryConfig, DiscoveryConfig, ServerConfig, StoreConfig};
pub use controller::{ControllerEvent, JobController, JobState};
pub use delivery::{DeliveryEngine, DeliveryMethod, DeliveryReceipt};
pub use error::{DeliveryError, Error, RequestError, Result, StoreError, TransportError};
pub use progress::{ProgressObserver, ProgressStreamClient};
pub use selection::BatchSelection;
pub use store::{DeliveryRecord, DirectoryCapability, Permission, Store};
pub use types::{
    BatchProgress, FailedItem, ItemDelivery, JobHandle, JobId, JobKind, JobRequest, JobStatus,
    MediaFormat, ProgressEvent, Quality, SelectableItem,
};
