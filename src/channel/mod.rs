//! Event-channel seam between the streaming engine and the transport.
//!
//! The session controller only sees this trait; the host application decides
//! which transport backs it and owns the client's lifecycle.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::ChunkEvent;

pub mod sse;

#[derive(Debug)]
pub enum ChannelError {
    /// `connect` was called for a request id with no registered consumer.
    NotSubscribed(String),
    /// The underlying connection could not be established.
    Connect(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NotSubscribed(request_id) => {
                write!(f, "no subscription registered for request {request_id}")
            }
            ChannelError::Connect(detail) => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Publish/subscribe channel delivering turn chunks, keyed by request id.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Establish the server connection feeding the request's route. May fail;
    /// chunks only start flowing after this succeeds.
    async fn connect(&self, request_id: &str) -> Result<(), ChannelError>;

    /// Register the consumer for a request id, replacing any prior route for
    /// the same id. Chunks arrive on the returned receiver one at a time.
    fn subscribe(&self, request_id: &str) -> mpsc::UnboundedReceiver<ChunkEvent>;

    /// Tear down the route for a request id and stop future delivery.
    /// Idempotent; unknown ids are ignored.
    fn unsubscribe(&self, request_id: &str);
}
