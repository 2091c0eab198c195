//! Progress push-channel client
//!
//! Maintains at most one live push-channel subscription per job slot and
//! translates the channel's raw JSON messages into typed
//! [`ProgressEvent`]s delivered to a single registered observer.
//!
//! Terminal semantics: after delivering a `done` or `error` event the client
//! closes the channel itself; no further events are accepted. Any transport
//! failure (handshake, connection drop, undecodable payload) is reported to
//! the observer exactly once and also closes the channel. The client never
//! reconnects on its own — reconnection is the caller's decision.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use futures::StreamExt;

use crate::api::MediaServer;
use crate::error::{Error, TransportError};
use crate::types::{JobHandle, ProgressEvent};

/// Receiver of decoded progress events for one job
///
/// Implementations must be cheap: callbacks run on the channel task and
/// serialize event handling for the job.
pub trait ProgressObserver: Send + Sync {
    /// A decoded progress event arrived
    fn on_event(&self, event: ProgressEvent);

    /// The channel failed; invoked at most once, after which no further
    /// callbacks are made for this channel
    fn on_transport_error(&self, error: TransportError);
}

/// Handle to one live push-channel subscription
pub struct StreamHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    /// Stop the channel task; safe to call more than once
    fn close(&self) {
        self.cancel.cancel();
    }
}

/// One job slot's push-channel client
///
/// Opening a new channel implicitly supersedes any channel already open on
/// this slot, so two observers can never mutate the same progress state
/// concurrently.
#[derive(Default)]
pub struct ProgressStreamClient {
    slot: Mutex<Option<StreamHandle>>,
}

impl ProgressStreamClient {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish the push channel for a job and start delivering events
    ///
    /// The handshake happens asynchronously on the channel task: a failed
    /// handshake surfaces through `observer.on_transport_error`, not as a
    /// return value. Any channel previously open on this slot is closed
    /// first.
    pub async fn open(
        &self,
        server: Arc<dyn MediaServer>,
        handle: JobHandle,
        observer: Arc<dyn ProgressObserver>,
    ) {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            run_channel(server, handle, observer, task_cancel).await;
        });

        let mut slot = self.slot.lock().await;
        if let Some(prev) = slot.replace(StreamHandle { cancel, task }) {
            tracing::debug!("Superseding previously open progress channel");
            prev.close();
        }
    }

    /// Close the slot's channel, if any; idempotent
    ///
    /// Safe to call from cancellation or observer teardown. Events already
    /// dispatched to the observer are unaffected; no new ones follow.
    pub async fn close(&self) {
        if let Some(handle) = self.slot.lock().await.take() {
            handle.close();
        }
    }

    /// True while a channel task is live on this slot
    pub async fn is_open(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }
}

/// Channel task: handshake, decode loop, terminal close
async fn run_channel(
    server: Arc<dyn MediaServer>,
    handle: JobHandle,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
) {
    let job_id = handle.id.clone();

    let open = tokio::select! {
        _ = cancel.cancelled() => return,
        open = server.open_progress_channel(&handle) => open,
    };

    let mut channel = match open {
        Ok(channel) => channel,
        Err(e) => {
            let error = into_transport_error(e);
            tracing::warn!(job_id = %job_id, error = %error, "Progress channel handshake failed");
            observer.on_transport_error(error);
            return;
        }
    };

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(job_id = %job_id, "Progress channel closed by caller");
                return;
            }
            message = channel.next() => message,
        };

        match message {
            Some(Ok(payload)) => match ProgressEvent::from_json(&payload) {
                Ok(event) => {
                    let terminal = event.status.is_terminal();
                    observer.on_event(event);
                    if terminal {
                        tracing::debug!(job_id = %job_id, "Terminal event received, closing channel");
                        return;
                    }
                }
                Err(error) => {
                    tracing::warn!(job_id = %job_id, error = %error, "Undecodable progress message");
                    observer.on_transport_error(error);
                    return;
                }
            },
            Some(Err(error)) => {
                tracing::warn!(job_id = %job_id, error = %error, "Progress channel transport failure");
                observer.on_transport_error(error);
                return;
            }
            None => {
                // Server closed the stream without a terminal event
                let error = TransportError::ConnectionDropped(
                    "channel closed without a terminal event".to_string(),
                );
                tracing::warn!(job_id = %job_id, "Progress channel ended prematurely");
                observer.on_transport_error(error);
                return;
            }
        }
    }
}

fn into_transport_error(error: Error) -> TransportError {
    match error {
        Error::Transport(t) => t,
        other => TransportError::ConnectionDropped(other.to_string()),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ArtifactResponse, DiscoveryPage, ProgressChannel};
    use crate::types::{JobId, JobKind, JobRequest, JobStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn handle(id: &str) -> JobHandle {
        JobHandle {
            id: JobId::from(id),
            kind: JobKind::Single,
            created_at: Utc::now(),
        }
    }

    /// Fake server whose progress channel replays canned payloads
    struct ScriptedServer {
        payloads: Vec<std::result::Result<String, TransportError>>,
        fail_handshake: bool,
    }

    impl ScriptedServer {
        fn with_payloads(payloads: &[&str]) -> Self {
            Self {
                payloads: payloads.iter().map(|p| Ok(p.to_string())).collect(),
                fail_handshake: false,
            }
        }
    }

    #[async_trait]
    impl MediaServer for ScriptedServer {
        async fn create_job(&self, _request: &JobRequest) -> crate::Result<JobHandle> {
            unimplemented!("not used by progress tests")
        }
        async fn cancel_job(&self, _job_id: &JobId) -> crate::Result<()> {
            Ok(())
        }
        async fn open_progress_channel(
            &self,
            _handle: &JobHandle,
        ) -> crate::Result<ProgressChannel> {
            if self.fail_handshake {
                return Err(Error::Transport(TransportError::HandshakeFailed {
                    status: 404,
                }));
            }
            Ok(futures::stream::iter(self.payloads.clone()).boxed())
        }
        async fn fetch_artifact(&self, _artifact_id: &str) -> crate::Result<ArtifactResponse> {
            unimplemented!("not used by progress tests")
        }
        async fn discover(
            &self,
            _query: &str,
            _limit: usize,
            _offset: usize,
        ) -> crate::Result<DiscoveryPage> {
            unimplemented!("not used by progress tests")
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<ProgressEvent>>,
        errors: StdMutex<Vec<TransportError>>,
    }

    impl ProgressObserver for Recorder {
        fn on_event(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
        fn on_transport_error(&self, error: TransportError) {
            self.errors.lock().unwrap().push(error);
        }
    }

    async fn settle(client: &ProgressStreamClient) {
        for _ in 0..200 {
            if !client.is_open().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("channel task did not finish in time");
    }

    #[tokio::test]
    async fn delivers_events_and_self_closes_on_done() {
        let server = Arc::new(ScriptedServer::with_payloads(&[
            r#"{"status":"waiting","progress":0}"#,
            r#"{"status":"downloading","progress":50}"#,
            r#"{"status":"done","progress":100}"#,
            r#"{"status":"downloading","progress":999}"#,
        ]));
        let observer = Arc::new(Recorder::default());
        let client = ProgressStreamClient::new();

        client.open(server, handle("j1"), observer.clone()).await;
        settle(&client).await;

        let events = observer.events.lock().unwrap();
        assert_eq!(
            events.len(),
            3,
            "events after the terminal one must not be delivered"
        );
        assert_eq!(events[2].status, JobStatus::Done);
        assert!(observer.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_json_payload_reports_transport_error_once_and_stops() {
        let server = Arc::new(ScriptedServer::with_payloads(&[
            r#"{"status":"waiting"}"#,
            "garbage payload",
            r#"{"status":"downloading","progress":10}"#,
        ]));
        let observer = Arc::new(Recorder::default());
        let client = ProgressStreamClient::new();

        client.open(server, handle("j1"), observer.clone()).await;
        settle(&client).await;

        assert_eq!(observer.events.lock().unwrap().len(), 1);
        let errors = observer.errors.lock().unwrap();
        assert_eq!(errors.len(), 1, "transport error reported exactly once");
        assert!(matches!(errors[0], TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn premature_stream_end_is_a_transport_error() {
        let server = Arc::new(ScriptedServer::with_payloads(&[
            r#"{"status":"downloading","progress":10}"#,
        ]));
        let observer = Arc::new(Recorder::default());
        let client = ProgressStreamClient::new();

        client.open(server, handle("j1"), observer.clone()).await;
        settle(&client).await;

        assert_eq!(observer.events.lock().unwrap().len(), 1);
        let errors = observer.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], TransportError::ConnectionDropped(_)));
    }

    #[tokio::test]
    async fn mid_stream_error_reported_once() {
        let server = Arc::new(ScriptedServer {
            payloads: vec![
                Ok(r#"{"status":"waiting"}"#.to_string()),
                Err(TransportError::ConnectionDropped("reset".to_string())),
                Ok(r#"{"status":"done"}"#.to_string()),
            ],
            fail_handshake: false,
        });
        let observer = Arc::new(Recorder::default());
        let client = ProgressStreamClient::new();

        client.open(server, handle("j1"), observer.clone()).await;
        settle(&client).await;

        assert_eq!(observer.events.lock().unwrap().len(), 1);
        assert_eq!(
            observer.errors.lock().unwrap().len(),
            1,
            "no callbacks after the first transport error"
        );
    }

    #[tokio::test]
    async fn handshake_failure_surfaces_through_observer() {
        let server = Arc::new(ScriptedServer {
            payloads: vec![],
            fail_handshake: true,
        });
        let observer = Arc::new(Recorder::default());
        let client = ProgressStreamClient::new();

        client.open(server, handle("j1"), observer.clone()).await;
        settle(&client).await;

        let errors = observer.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            TransportError::HandshakeFailed { status: 404 }
        ));
        assert!(observer.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn opening_supersedes_previous_channel() {
        // First channel never yields; it must be cancelled by the second open.
        let first_observer = Arc::new(Recorder::default());
        let client = ProgressStreamClient::new();

        // A channel that stays pending forever
        struct PendingServer;
        #[async_trait]
        impl MediaServer for PendingServer {
            async fn create_job(&self, _r: &JobRequest) -> crate::Result<JobHandle> {
                unimplemented!()
            }
            async fn cancel_job(&self, _j: &JobId) -> crate::Result<()> {
                Ok(())
            }
            async fn open_progress_channel(
                &self,
                _h: &JobHandle,
            ) -> crate::Result<ProgressChannel> {
                Ok(futures::stream::pending().boxed())
            }
            async fn fetch_artifact(&self, _a: &str) -> crate::Result<ArtifactResponse> {
                unimplemented!()
            }
            async fn discover(
                &self,
                _q: &str,
                _l: usize,
                _o: usize,
            ) -> crate::Result<DiscoveryPage> {
                unimplemented!()
            }
        }

        client
            .open(Arc::new(PendingServer), handle("j1"), first_observer.clone())
            .await;
        assert!(client.is_open().await);

        let second_observer = Arc::new(Recorder::default());
        client
            .open(
                Arc::new(ScriptedServer::with_payloads(&[r#"{"status":"done"}"#])),
                handle("j1"),
                second_observer.clone(),
            )
            .await;
        settle(&client).await;

        assert_eq!(second_observer.events.lock().unwrap().len(), 1);
        assert!(
            first_observer.events.lock().unwrap().is_empty(),
            "superseded channel must not deliver anything"
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_delivery() {
        struct SlowServer;
        #[async_trait]
        impl MediaServer for SlowServer {
            async fn create_job(&self, _r: &JobRequest) -> crate::Result<JobHandle> {
                unimplemented!()
            }
            async fn cancel_job(&self, _j: &JobId) -> crate::Result<()> {
                Ok(())
            }
            async fn open_progress_channel(
                &self,
                _h: &JobHandle,
            ) -> crate::Result<ProgressChannel> {
                // One event after a delay, then pending forever
                let stream = futures::stream::once(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(r#"{"status":"downloading","progress":1}"#.to_string())
                })
                .chain(futures::stream::pending());
                Ok(stream.boxed())
            }
            async fn fetch_artifact(&self, _a: &str) -> crate::Result<ArtifactResponse> {
                unimplemented!()
            }
            async fn discover(
                &self,
                _q: &str,
                _l: usize,
                _o: usize,
            ) -> crate::Result<DiscoveryPage> {
                unimplemented!()
            }
        }

        let observer = Arc::new(Recorder::default());
        let client = ProgressStreamClient::new();
        client
            .open(Arc::new(SlowServer), handle("j1"), observer.clone())
            .await;

        client.close().await;
        client.close().await; // second close is a no-op
        settle(&client).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(
            observer.events.lock().unwrap().is_empty(),
            "no events may be processed after close"
        );
        assert!(observer.errors.lock().unwrap().is_empty());
    }
}
