//! Job controller: the per-job state machine tying request, progress
//! channel, delivery, and history together.
//!
//! One controller drives exactly one job: `start` is valid from `Idle` only,
//! and terminal states permit no further transitions. A new job takes a new
//! controller. Progress events that arrive after the job left `Streaming`
//! are dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::api::MediaServer;
use crate::config::Config;
use crate::delivery::{DeliveryEngine, DeliveryReceipt};
use crate::error::{Error, Result, TransportError};
use crate::progress::{ProgressObserver, ProgressStreamClient};
use crate::store::{DeliveryRecord, Store};
use crate::types::{ItemDelivery, JobHandle, JobRequest, JobStatus, ProgressEvent};


/// Lifecycle state of the controller's current job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// No job yet
    Idle,
    /// Creation request in flight
    Requesting,
    /// Job accepted, progress channel live
    Streaming,
    /// Job finished successfully
    Done,
    /// Job failed, server-side or on transport
    Failed,
    /// Job cancelled locally
    Cancelled,
}

impl JobState {
    /// True once the job can no longer make progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Requesting => "requesting",
            JobState::Streaming => "streaming",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification pushed to controller subscribers
#[derive(Clone, Debug)]
pub enum ControllerEvent {
    /// The state machine moved to a new state
    StateChanged(JobState),
    /// A decoded progress event was accepted
    Progress(ProgressEvent),
    /// An artifact reached disk
    Delivered(DeliveryReceipt),
    /// An artifact's delivery failed; the job itself keeps going
    DeliveryFailed {
        /// Artifact whose delivery failed
        artifact_id: String,
        /// Why
        reason: String,
    },
    /// The progress channel failed
    TransportError(String),
}

struct JobSlot {
    state: JobState,
    handle: Option<JobHandle>,
    last_event: Option<ProgressEvent>,
    // Artifact ids already handed to the delivery engine for this job
    delivered: HashSet<String>,
}

struct Inner {
    server: Arc<dyn MediaServer>,
    engine: DeliveryEngine,
    store: Arc<Store>,
    history_limit: usize,
    stream: ProgressStreamClient,
    slot: Mutex<JobSlot>,
    events: broadcast::Sender<ControllerEvent>,
}

/// Drives one media job from request to delivered artifacts
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    /// Create a controller over the given server and store
    pub fn new(server: Arc<dyn MediaServer>, store: Arc<Store>, config: &Config) -> Self {
        let engine = DeliveryEngine::new(server.clone(), store.clone(), config.delivery.clone());
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                server,
                engine,
                store,
                history_limit: config.store.history_limit,
                stream: ProgressStreamClient::new(),
                slot: Mutex::new(JobSlot {
                    state: JobState::Idle,
                    handle: None,
                    last_event: None,
                    delivered: HashSet::new(),
                }),
                events,
            }),
        }
    }

    /// Subscribe to controller notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.inner.lock_slot().state
    }

    /// Handle of the current job, once accepted
    pub fn job(&self) -> Option<JobHandle> {
        self.inner.lock_slot().handle.clone()
    }

    /// Most recent accepted progress event
    pub fn last_event(&self) -> Option<ProgressEvent> {
        self.inner.lock_slot().last_event.clone()
    }

    /// Submit a job and start streaming its progress
    ///
    /// Valid from `Idle` only; a controller whose job has finished, failed,
    /// or been cancelled stays terminal, and a new job needs a new
    /// controller. Fails immediately if creation is rejected; the controller
    /// is then in `Failed` and no progress channel is opened.
    pub async fn start(&self, request: JobRequest) -> Result<JobHandle> {
        {
            let mut slot = self.inner.lock_slot();
            if slot.state != JobState::Idle {
                return Err(Error::InvalidState {
                    operation: "start".to_string(),
                    state: slot.state.to_string(),
                });
            }
            slot.state = JobState::Requesting;
        }
        self.inner.emit(ControllerEvent::StateChanged(JobState::Requesting));

        let handle = match self.inner.server.create_job(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Job creation rejected");
                self.inner.transition(JobState::Failed);
                return Err(e);
            }
        };

        {
            let mut slot = self.inner.lock_slot();
            if slot.state != JobState::Requesting {
                // Cancelled while the request was in flight
                drop(slot);
                if let Err(e) = self.inner.server.cancel_job(&handle.id).await {
                    tracing::debug!(job_id = %handle.id, error = %e, "Best-effort cancel of orphaned job failed");
                }
                return Err(Error::InvalidState {
                    operation: "start".to_string(),
                    state: self.state().to_string(),
                });
            }
            slot.handle = Some(handle.clone());
            slot.state = JobState::Streaming;
        }
        self.inner.emit(ControllerEvent::StateChanged(JobState::Streaming));
        tracing::info!(job_id = %handle.id, kind = ?handle.kind, "Job accepted, opening progress channel");

        let observer: Arc<dyn ProgressObserver> = Arc::new(ChannelObserver {
            inner: self.inner.clone(),
        });
        self.inner
            .stream
            .open(self.inner.server.clone(), handle.clone(), observer)
            .await;

        self.inner.reap_stale_channel().await;

        Ok(handle)
    }

    /// Cancel the current job
    ///
    /// Valid from `Requesting` and `Streaming` only. The server-side cancel
    /// is best-effort; local teardown happens regardless of its outcome.
    pub async fn cancel(&self) -> Result<()> {
        let handle = {
            let mut slot = self.inner.lock_slot();
            if !matches!(slot.state, JobState::Requesting | JobState::Streaming) {
                return Err(Error::InvalidState {
                    operation: "cancel".to_string(),
                    state: slot.state.to_string(),
                });
            }
            slot.state = JobState::Cancelled;
            slot.delivered.clear();
            slot.handle.take()
        };
        self.inner.emit(ControllerEvent::StateChanged(JobState::Cancelled));

        if let Some(handle) = handle {
            if let Err(e) = self.inner.server.cancel_job(&handle.id).await {
                tracing::warn!(job_id = %handle.id, error = %e, "Server-side cancel failed");
            }
        }
        self.inner.stream.close().await;
        tracing::info!("Job cancelled");
        Ok(())
    }
}

impl Inner {
    fn lock_slot(&self) -> std::sync::MutexGuard<'_, JobSlot> {
        // Slot mutations never panic while holding the lock
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, state: JobState) {
        self.lock_slot().state = state;
        self.emit(ControllerEvent::StateChanged(state));
    }

    /// Close the progress channel if the job left `Streaming` while the
    /// channel was still being opened
    ///
    /// A cancel landing in that window finds no channel to close yet; the
    /// channel installed afterwards would otherwise stay live.
    async fn reap_stale_channel(&self) {
        if self.lock_slot().state != JobState::Streaming {
            self.stream.close().await;
        }
    }

    /// Deliver one artifact and record the outcome; runs on its own task
    async fn deliver_and_record(self: Arc<Self>, item: ItemDelivery) {
        match self.engine.deliver(&item).await {
            Ok(receipt) => {
                let record = DeliveryRecord {
                    artifact_id: item.artifact_id.clone(),
                    title: item.suggested_title.clone(),
                    filename: receipt.filename.clone(),
                    method: receipt.method,
                    delivered_at: Utc::now(),
                };
                if let Err(e) = self.store.append_delivery(&record).await {
                    tracing::warn!(artifact_id = %item.artifact_id, error = %e, "Could not record delivery");
                } else if let Err(e) = self.store.prune_history(self.history_limit).await {
                    tracing::warn!(error = %e, "Could not prune delivery history");
                }
                self.emit(ControllerEvent::Delivered(receipt));
            }
            Err(e) => {
                // Delivery failures never fail the job
                tracing::warn!(artifact_id = %item.artifact_id, error = %e, "Artifact delivery failed");
                self.emit(ControllerEvent::DeliveryFailed {
                    artifact_id: item.artifact_id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Adapts the progress channel callbacks onto the controller state machine
struct ChannelObserver {
    inner: Arc<Inner>,
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: ProgressEvent) {
        let new_items = {
            let mut slot = self.inner.lock_slot();
            if slot.state != JobState::Streaming {
                tracing::debug!("Dropping progress event outside streaming state");
                return;
            }
            slot.last_event = Some(event.clone());

            let mut new_items: Vec<ItemDelivery> = Vec::new();
            if let Some(item) = &event.item
                && slot.delivered.insert(item.artifact_id.clone())
            {
                new_items.push(item.clone());
            }
            if let Some(batch) = &event.batch {
                for item in &batch.completed_items {
                    if slot.delivered.insert(item.artifact_id.clone()) {
                        new_items.push(item.clone());
                    }
                }
            }
            new_items
        };

        self.inner.emit(ControllerEvent::Progress(event.clone()));

        for item in new_items {
            tracing::info!(artifact_id = %item.artifact_id, "Artifact completed, scheduling delivery");
            tokio::spawn(self.inner.clone().deliver_and_record(item));
        }

        match &event.status {
            JobStatus::Done => {
                if let Some(batch) = &event.batch {
                    if !batch.is_consistent() {
                        tracing::warn!(
                            total = batch.total_count,
                            completed = batch.completed_count,
                            failed = batch.failed_items.len(),
                            "Batch tally inconsistent at completion"
                        );
                    }
                    tracing::info!(
                        succeeded = batch.succeeded_count(),
                        failed = batch.failed_items.len(),
                        "Batch job done"
                    );
                } else {
                    tracing::info!("Job done");
                }
                self.inner.transition(JobState::Done);
            }
            JobStatus::Error => {
                tracing::warn!(
                    error = event.error_message.as_deref().unwrap_or("Unknown error"),
                    "Job failed server-side"
                );
                self.inner.transition(JobState::Failed);
            }
            _ => {}
        }
    }

    fn on_transport_error(&self, error: TransportError) {
        {
            let slot = self.inner.lock_slot();
            if slot.state != JobState::Streaming {
                tracing::debug!(error = %error, "Transport error after job left streaming state");
                return;
            }
        }
        tracing::warn!(error = %error, "Progress channel failed");
        self.inner.emit(ControllerEvent::TransportError(error.to_string()));
        self.inner.transition(JobState::Failed);
    }
}
