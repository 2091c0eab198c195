//! HTTP implementation of the [`MediaServer`] contract
//!
//! Endpoint layout mirrors the extraction service's REST surface: job
//! creation under `download/video`, `download/audio` and
//! `download/batch/download`, SSE progress under `download/progress/{id}` and
//! `download/batch/progress/{id}`, artifacts under `download/file/{id}`, and
//! discovery under `download/batch/info`.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{Error, RequestError, Result, TransportError};
use crate::types::{JobHandle, JobId, JobKind, JobRequest, MediaFormat, SelectableItem};

use super::{ArtifactResponse, DiscoveryPage, MediaServer, ProgressChannel};

/// HTTP client for the remote extraction service
#[derive(Clone)]
pub struct HttpMediaServer {
    client: reqwest::Client,
    base_url: url::Url,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl HttpMediaServer {
    /// Build a client from server configuration
    ///
    /// The underlying HTTP client carries no global timeout: the progress
    /// push channel must be allowed to stay open indefinitely. Plain
    /// request/response calls apply `request_timeout` individually.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let base_url = url::Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL: {e}"),
            key: Some("server.base_url".to_string()),
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            auth_token: config.auth_token.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Other(format!("invalid endpoint path {path}: {e}")))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Map a non-success response into a [`RequestError::Rejected`], pulling
    /// the error detail out of the body when the server provides one.
    async fn rejection(response: reqwest::Response) -> Error {
        #[derive(Deserialize)]
        struct ErrorBody {
            detail: String,
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.detail)
            .unwrap_or(body);

        Error::Request(RequestError::Rejected { status, message })
    }
}

#[derive(Deserialize)]
struct CreatedJob {
    #[serde(default)]
    download_id: Option<String>,
    #[serde(default)]
    batch_id: Option<String>,
}

#[derive(serde::Serialize)]
struct DiscoverBody<'a> {
    url: &'a str,
    limit: usize,
    offset: usize,
}

#[derive(Deserialize)]
struct DiscoverResponse {
    videos: Vec<SelectableItem>,
    has_more: bool,
}

#[async_trait]
impl MediaServer for HttpMediaServer {
    async fn create_job(&self, request: &JobRequest) -> Result<JobHandle> {
        let path = match request {
            JobRequest::Single {
                format: MediaFormat::Mp3,
                ..
            } => "download/audio",
            JobRequest::Single { .. } => "download/video",
            JobRequest::Batch { .. } => "download/batch/download",
        };
        let kind = request.kind();

        let response = self
            .authorize(self.client.post(self.endpoint(path)?))
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Request(RequestError::Unreachable(e.to_string())))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let created: CreatedJob = response
            .json()
            .await
            .map_err(|e| Error::Request(RequestError::InvalidResponse(e.to_string())))?;

        let id = match kind {
            JobKind::Single => created.download_id,
            JobKind::Batch => created.batch_id,
        }
        .ok_or_else(|| {
            Error::Request(RequestError::InvalidResponse(
                "creation response missing job id".to_string(),
            ))
        })?;

        tracing::info!(job_id = %id, ?kind, "Job created");

        Ok(JobHandle {
            id: JobId::new(id),
            kind,
            created_at: Utc::now(),
        })
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<()> {
        let response = self
            .authorize(
                self.client
                    .post(self.endpoint(&format!("download/cancel/{job_id}"))?),
            )
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Request(RequestError::Unreachable(e.to_string())))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    async fn open_progress_channel(&self, handle: &JobHandle) -> Result<ProgressChannel> {
        let path = match handle.kind {
            JobKind::Single => format!("download/progress/{}", handle.id),
            JobKind::Batch => format!("download/batch/progress/{}", handle.id),
        };

        // No timeout here: the channel stays open until a terminal event.
        let response = self
            .authorize(self.client.get(self.endpoint(&path)?))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                Error::Transport(TransportError::ConnectionDropped(e.to_string()))
            })?;

        if !response.status().is_success() {
            return Err(Error::Transport(TransportError::HandshakeFailed {
                status: response.status().as_u16(),
            }));
        }

        Ok(sse_payloads(response))
    }

    async fn fetch_artifact(&self, artifact_id: &str) -> Result<ArtifactResponse> {
        let response = self
            .authorize(
                self.client
                    .get(self.endpoint(&format!("download/file/{artifact_id}"))?),
            )
            .send()
            .await
            .map_err(|e| Error::Request(RequestError::Unreachable(e.to_string())))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let filename_hint = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition);

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| std::io::Error::other(e.to_string()))
            })
            .boxed();

        Ok(ArtifactResponse {
            content_type,
            filename_hint,
            stream,
        })
    }

    async fn discover(&self, query: &str, limit: usize, offset: usize) -> Result<DiscoveryPage> {
        let response = self
            .authorize(self.client.post(self.endpoint("download/batch/info")?))
            .timeout(self.request_timeout)
            .json(&DiscoverBody {
                url: query,
                limit,
                offset,
            })
            .send()
            .await
            .map_err(|e| Error::Request(RequestError::Unreachable(e.to_string())))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let page: DiscoverResponse = response
            .json()
            .await
            .map_err(|e| Error::Request(RequestError::InvalidResponse(e.to_string())))?;

        tracing::debug!(
            count = page.videos.len(),
            has_more = page.has_more,
            offset,
            "Discovery page loaded"
        );

        Ok(DiscoveryPage {
            items: page.videos,
            has_more: page.has_more,
        })
    }
}

/// Extract a filename from a Content-Disposition header value
///
/// Prefers the RFC 5987 `filename*=UTF-8''…` form (percent-decoded) over the
/// plain `filename="…"` form. Unlike stem extraction, the full name including
/// extension is kept — it feeds filename derivation downstream.
fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // Format is: charset'lang'encoded-filename
            if let Some(idx) = encoded.rfind('\'')
                && let Ok(decoded) = urlencoding::decode(&encoded[idx + 1..])
                && !decoded.is_empty()
            {
                return Some(decoded.to_string());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() {
                plain = Some(name.to_string());
            }
        }
    }

    plain
}

/// Decode a text/event-stream response into its `data:` payloads
fn sse_payloads(response: reqwest::Response) -> ProgressChannel {
    let body = response
        .bytes_stream()
        .map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| TransportError::ConnectionDropped(e.to_string()))
        })
        .boxed();
    sse_frames(body)
}

/// Split a stream of body chunks into SSE `data:` payloads
///
/// Buffering is byte-level: network chunk boundaries are arbitrary and can
/// split a multi-byte UTF-8 sequence mid-character, so text decoding happens
/// once per complete frame, never per chunk. Frames are separated by a blank
/// line; `\r` bytes are stripped; comment lines (`:` prefix) and non-data
/// fields are dropped; multiple `data:` lines within one frame are joined
/// with a newline per the SSE spec. A mid-stream body error surfaces as one
/// [`TransportError::ConnectionDropped`] and ends the stream.
fn sse_frames(
    body: futures::stream::BoxStream<'static, std::result::Result<Vec<u8>, TransportError>>,
) -> ProgressChannel {
    struct State {
        inner: futures::stream::BoxStream<'static, std::result::Result<Vec<u8>, TransportError>>,
        buf: Vec<u8>,
        pending: VecDeque<String>,
        finished: bool,
    }

    let state = State {
        inner: body,
        buf: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.pending.pop_front() {
                return Some((Ok(payload), st));
            }
            if st.finished {
                return None;
            }

            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend(chunk.into_iter().filter(|&b| b != b'\r'));
                    while let Some(idx) = st.buf.windows(2).position(|w| w == b"\n\n") {
                        let frame_bytes: Vec<u8> = st.buf.drain(..idx + 2).take(idx).collect();
                        let frame = String::from_utf8_lossy(&frame_bytes);
                        if let Some(payload) = parse_sse_frame(&frame) {
                            st.pending.push_back(payload);
                        }
                    }
                }
                Some(Err(error)) => {
                    st.finished = true;
                    return Some((Err(error), st));
                }
                None => {
                    st.finished = true;
                    return None;
                }
            }
        }
    })
    .boxed()
}

/// Extract the joined `data:` payload from one SSE frame, if it has any
fn parse_sse_frame(frame: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
