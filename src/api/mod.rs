use serde::{Deserialize, Serialize};

use crate::core::message::Citation;

pub mod turn;

/// One prior conversation entry sent to the turn endpoint.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct TurnRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub history: Vec<HistoryMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_entity_type: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TurnResponse {
    pub request_id: String,
    pub conversation_id: String,
}

/// A single event delivered on the per-request channel.
///
/// Wire shape is `{ "type": ..., content?, data?, message? }`; serde's
/// internal tagging on `type` picks the variant.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkEvent {
    Citations {
        #[serde(default)]
        data: Vec<Citation>,
    },
    Delta {
        #[serde(default)]
        content: String,
    },
    MutationPending {
        data: MutationPendingData,
    },
    MutationPreview {
        data: MutationPreviewData,
    },
    MutationError {
        #[serde(default)]
        data: Option<MutationErrorData>,
        #[serde(default)]
        message: Option<String>,
    },
    Done,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MutationPendingData {
    pub tool_call_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MutationPreviewData {
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MutationErrorData {
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
