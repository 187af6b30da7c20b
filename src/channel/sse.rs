//! SSE-backed implementation of the event channel.
//!
//! One spawned reader task per connected request id; lines are framed from
//! the byte stream, `data:` payloads are parsed into [`ChunkEvent`]s and
//! forwarded to the subscribed receiver. Unsubscribing cancels the reader.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ChunkEvent;
use crate::channel::{ChannelError, EventChannel};
use crate::utils::url::construct_api_url;

struct Route {
    tx: mpsc::UnboundedSender<ChunkEvent>,
    cancel: CancellationToken,
}

pub struct SseEventChannel {
    client: reqwest::Client,
    base_url: String,
    routes: Arc<Mutex<HashMap<String, Route>>>,
}

impl SseEventChannel {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            routes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Forward one `data:` payload. Returns true once the stream is finished.
fn handle_data_payload(payload: &str, tx: &mpsc::UnboundedSender<ChunkEvent>) -> bool {
    if payload.is_empty() {
        return false;
    }

    match serde_json::from_str::<ChunkEvent>(payload) {
        Ok(chunk) => {
            let terminal = matches!(chunk, ChunkEvent::Done | ChunkEvent::Error { .. });
            let _ = tx.send(chunk);
            terminal
        }
        Err(err) => {
            debug!(%err, "malformed chunk payload, failing the stream");
            let _ = tx.send(ChunkEvent::Error {
                message: Some(format!("malformed stream payload: {err}")),
            });
            true
        }
    }
}

fn process_sse_line(line: &str, tx: &mpsc::UnboundedSender<ChunkEvent>) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx))
        .unwrap_or(false)
}

#[async_trait]
impl EventChannel for SseEventChannel {
    async fn connect(&self, request_id: &str) -> Result<(), ChannelError> {
        let (tx, cancel) = {
            let routes = self
                .routes
                .lock()
                .map_err(|_| ChannelError::Connect("channel routes poisoned".to_string()))?;
            let route = routes
                .get(request_id)
                .ok_or_else(|| ChannelError::NotSubscribed(request_id.to_string()))?;
            (route.tx.clone(), route.cancel.clone())
        };

        let stream_url =
            construct_api_url(&self.base_url, &format!("assistant/stream/{request_id}"));
        let response = self
            .client
            .get(stream_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|err| ChannelError::Connect(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Connect(format!(
                "stream request failed with status {}",
                response.status()
            )));
        }

        let routes = Arc::clone(&self.routes);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            tokio::select! {
                _ = async {
                    while let Some(chunk) = stream.next().await {
                        let Ok(chunk_bytes) = chunk else {
                            let _ = tx.send(ChunkEvent::Error {
                                message: Some("stream connection lost".to_string()),
                            });
                            return;
                        };
                        buffer.extend_from_slice(&chunk_bytes);

                        while let Some(newline_pos) = memchr(b'\n', &buffer) {
                            let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                                Ok(s) => s.trim().to_string(),
                                Err(err) => {
                                    debug!(%err, "invalid UTF-8 in stream");
                                    buffer.drain(..=newline_pos);
                                    continue;
                                }
                            };
                            buffer.drain(..=newline_pos);
                            if process_sse_line(&line, &tx) {
                                return;
                            }
                        }
                    }
                } => {}
                _ = cancel.cancelled() => {}
            }

            if let Ok(mut routes) = routes.lock() {
                routes.remove(&request_id);
            }
        });

        Ok(())
    }

    fn subscribe(&self, request_id: &str) -> mpsc::UnboundedReceiver<ChunkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let route = Route {
            tx,
            cancel: CancellationToken::new(),
        };
        if let Ok(mut routes) = self.routes.lock() {
            if let Some(previous) = routes.insert(request_id.to_string(), route) {
                previous.cancel.cancel();
            }
        }
        rx
    }

    fn unsubscribe(&self, request_id: &str) {
        if let Ok(mut routes) = self.routes.lock() {
            if let Some(route) = routes.remove(request_id) {
                route.cancel.cancel();
            }
        }
    }
}
