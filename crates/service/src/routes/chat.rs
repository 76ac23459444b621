use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use kimichat_core::config::ModelOverrides;
use kimichat_core::message::chat_messages;
use kimichat_core::retry::run_with_retry;

use crate::envelope::{json_error, json_success, now_rfc3339};
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};
use crate::{sse, AppState};

const CHAT_TEMPERATURE: f32 = 0.6;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    stream: bool,
}

#[derive(Serialize)]
struct ChatData {
    message: String,
    timestamp: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn effective_system_prompt(value: Option<String>) -> String {
    non_blank(value).unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

fn effective_user_input(value: Option<String>) -> String {
    non_blank(value).unwrap_or_else(|| DEFAULT_USER_PROMPT.to_string())
}

/// `POST /api/ai/chat` — single JSON completion, or an SSE relay when
/// `stream: true`.
///
/// Both modes run call initiation through the retrying executor; once a
/// stream is open, mid-stream failures are the relay's business, not a
/// retry trigger.
pub(crate) async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response<Body> {
    let system_prompt = effective_system_prompt(request.system_prompt);
    let user_input = effective_user_input(request.message);
    let messages = chat_messages(&system_prompt, &user_input);

    let overrides = ModelOverrides {
        temperature: Some(CHAT_TEMPERATURE),
        ..ModelOverrides::default()
    };
    let client = match state.chat_client(&overrides) {
        Ok(client) => client,
        Err(err) => {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "chat service unavailable",
                err.to_string(),
            )
        }
    };
    let policy = client.config().retry_policy();

    if request.stream {
        // Pre-stream failures still have the normal JSON error path; once
        // relay_response is returned the SSE contract is committed.
        match run_with_retry(&policy, || client.stream(&messages)).await {
            Ok(fragments) => sse::relay_response(fragments),
            Err(err) => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "chat completion failed",
                err.to_string(),
            ),
        }
    } else {
        match run_with_retry(&policy, || client.invoke(&messages)).await {
            Ok(message) => json_success(ChatData {
                message,
                timestamp: now_rfc3339(),
            }),
            Err(err) => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "chat completion failed",
                err.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{effective_system_prompt, effective_user_input, ChatRequest};
    use crate::prompts::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};

    #[test]
    fn empty_message_substitutes_default_prompt() {
        assert_eq!(effective_user_input(None), DEFAULT_USER_PROMPT);
        assert_eq!(
            effective_user_input(Some("   ".to_string())),
            DEFAULT_USER_PROMPT
        );
    }

    #[test]
    fn provided_message_is_used_verbatim() {
        assert_eq!(
            effective_user_input(Some("what is rust?".to_string())),
            "what is rust?"
        );
    }

    #[test]
    fn missing_system_prompt_uses_default() {
        assert_eq!(effective_system_prompt(None), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(
            effective_system_prompt(Some("You are a pirate.".to_string())),
            "You are a pirate."
        );
    }

    #[test]
    fn stream_flag_defaults_to_false() {
        assert!(!ChatRequest::default().stream);
    }
}
