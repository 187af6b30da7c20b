#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use tokio::sync::mpsc;

#[cfg(test)]
use crate::api::turn::{TurnError, TurnInitiator};
#[cfg(test)]
use crate::api::{
    ChunkEvent, MutationErrorData, MutationPendingData, MutationPreviewData, TurnRequest,
    TurnResponse,
};
#[cfg(test)]
use crate::channel::{ChannelError, EventChannel};
#[cfg(test)]
use crate::core::message::Citation;

#[cfg(test)]
pub fn delta(text: &str) -> ChunkEvent {
    ChunkEvent::Delta {
        content: text.to_string(),
    }
}

#[cfg(test)]
pub fn citations_chunk(data: Vec<Citation>) -> ChunkEvent {
    ChunkEvent::Citations { data }
}

#[cfg(test)]
pub fn mutation_pending(tool_call_id: &str) -> ChunkEvent {
    ChunkEvent::MutationPending {
        data: MutationPendingData {
            tool_call_id: tool_call_id.to_string(),
        },
    }
}

#[cfg(test)]
pub fn mutation_preview(
    tool_call_id: Option<&str>,
    entity_type: &str,
    entity_id: &str,
) -> ChunkEvent {
    ChunkEvent::MutationPreview {
        data: MutationPreviewData {
            tool_call_id: tool_call_id.map(str::to_string),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            description: format!("update {entity_type} {entity_id}"),
        },
    }
}

#[cfg(test)]
pub fn mutation_error(message: Option<&str>) -> ChunkEvent {
    ChunkEvent::MutationError {
        data: Some(MutationErrorData {
            tool_call_id: None,
            message: None,
        }),
        message: message.map(str::to_string),
    }
}

#[cfg(test)]
pub fn error_chunk(message: Option<&str>) -> ChunkEvent {
    ChunkEvent::Error {
        message: message.map(str::to_string),
    }
}

#[cfg(test)]
pub fn test_citation(entity_id: &str) -> Citation {
    Citation {
        entity_type: "document".to_string(),
        entity_id: entity_id.to_string(),
        org_id: "org-1".to_string(),
        display_name: format!("Document {entity_id}"),
    }
}

/// Turn initiator replaying a scripted sequence of outcomes; the last outcome
/// repeats once the script runs out.
#[cfg(test)]
pub struct ScriptedInitiator {
    outcomes: Vec<Result<TurnResponse, String>>,
    requests: Mutex<Vec<TurnRequest>>,
}

#[cfg(test)]
impl ScriptedInitiator {
    pub fn succeeding(request_id: &str, conversation_id: &str) -> Self {
        Self::succeeding_sequence(&[(request_id, conversation_id)])
    }

    pub fn succeeding_sequence(turns: &[(&str, &str)]) -> Self {
        Self {
            outcomes: turns
                .iter()
                .map(|(request_id, conversation_id)| {
                    Ok(TurnResponse {
                        request_id: request_id.to_string(),
                        conversation_id: conversation_id.to_string(),
                    })
                })
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            outcomes: vec![Err(detail.to_string())],
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl TurnInitiator for ScriptedInitiator {
    async fn start_turn(&self, request: &TurnRequest) -> Result<TurnResponse, TurnError> {
        let call_index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let outcome = self
            .outcomes
            .get(call_index)
            .or_else(|| self.outcomes.last())
            .expect("scripted initiator needs at least one outcome");
        match outcome {
            Ok(response) => Ok(response.clone()),
            Err(detail) => Err(TurnError::Status {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                detail: detail.clone(),
            }),
        }
    }
}

/// In-process event channel recording every subscribe/connect/unsubscribe
/// call, with a `push` hook for tests to deliver chunks.
#[cfg(test)]
pub struct ScriptedChannel {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<ChunkEvent>>>,
    log: Mutex<Vec<String>>,
    fail_connect: bool,
}

#[cfg(test)]
impl ScriptedChannel {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            fail_connect: false,
        }
    }

    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    /// Deliver a chunk to the route for `request_id`. Returns false when no
    /// consumer is registered.
    pub fn push(&self, request_id: &str, chunk: ChunkEvent) -> bool {
        self.routes
            .lock()
            .unwrap()
            .get(request_id)
            .is_some_and(|tx| tx.send(chunk).is_ok())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[cfg(test)]
#[async_trait]
impl EventChannel for ScriptedChannel {
    async fn connect(&self, request_id: &str) -> Result<(), ChannelError> {
        self.record(format!("connect:{request_id}"));
        if self.fail_connect {
            Err(ChannelError::Connect("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn subscribe(&self, request_id: &str) -> mpsc::UnboundedReceiver<ChunkEvent> {
        self.record(format!("subscribe:{request_id}"));
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().unwrap().insert(request_id.to_string(), tx);
        rx
    }

    fn unsubscribe(&self, request_id: &str) {
        self.record(format!("unsubscribe:{request_id}"));
        self.routes.lock().unwrap().remove(request_id);
    }
}
