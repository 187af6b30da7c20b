use std::fmt;

use async_trait::async_trait;

use crate::api::{TurnRequest, TurnResponse};
use crate::utils::url::construct_api_url;

#[derive(Debug)]
pub enum TurnError {
    /// The request never produced a response.
    Transport(reqwest::Error),
    /// The server answered with a non-success status.
    Status {
        status: reqwest::StatusCode,
        detail: String,
    },
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::Transport(source) => write!(f, "turn request failed: {source}"),
            TurnError::Status { status, detail } => {
                write!(f, "turn request failed with status {status}: {detail}")
            }
        }
    }
}

impl std::error::Error for TurnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TurnError::Transport(source) => Some(source),
            TurnError::Status { .. } => None,
        }
    }
}

/// Starts a conversational turn and hands back the per-turn request id.
#[async_trait]
pub trait TurnInitiator: Send + Sync {
    async fn start_turn(&self, request: &TurnRequest) -> Result<TurnResponse, TurnError>;
}

pub struct HttpTurnInitiator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTurnInitiator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TurnInitiator for HttpTurnInitiator {
    async fn start_turn(&self, request: &TurnRequest) -> Result<TurnResponse, TurnError> {
        let turn_url = construct_api_url(&self.base_url, "assistant/turns");
        let response = self
            .client
            .post(turn_url)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(TurnError::Transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(TurnError::Status {
                status,
                detail: summarize_error_body(&body),
            });
        }

        response
            .json::<TurnResponse>()
            .await
            .map_err(TurnError::Transport)
    }
}

/// Reduce an error body to one readable line, preferring the JSON
/// `error.message` shapes the backend emits.
fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&value) {
            if !summary.is_empty() {
                return summary;
            }
        }
    }

    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_nested_error_messages() {
        assert_eq!(
            summarize_error_body(r#"{"error":{"message":"org   not\nfound"}}"#),
            "org not found"
        );
        assert_eq!(
            summarize_error_body(r#"{"error":"quota exceeded"}"#),
            "quota exceeded"
        );
        assert_eq!(
            summarize_error_body(r#"{"message":"bad request"}"#),
            "bad request"
        );
    }

    #[test]
    fn falls_back_to_collapsed_plain_text() {
        assert_eq!(summarize_error_body("  upstream \n unavailable "), "upstream unavailable");
        assert_eq!(summarize_error_body(r#"{"status":"failed"}"#), r#"{"status":"failed"}"#);
        assert_eq!(summarize_error_body("   "), "<empty>");
    }

    #[test]
    fn status_errors_render_with_detail() {
        let err = TurnError::Status {
            status: reqwest::StatusCode::FORBIDDEN,
            detail: "no access to org".into(),
        };
        assert_eq!(
            err.to_string(),
            "turn request failed with status 403 Forbidden: no access to org"
        );
    }
}
