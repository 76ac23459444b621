use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, ENV_API_KEY};
use crate::message::ChatMessage;

const DONE_SENTINEL: &str = "[DONE]";
const ERROR_DETAIL_MAX_CHARS: usize = 512;

/// Failures raised by the hosted completion provider boundary.
#[derive(Debug)]
pub enum ProviderError {
    MissingApiKey,
    Http(reqwest::Error),
    Status { status: u16, detail: String },
    EmptyCompletion,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingApiKey => {
                write!(f, "provider api key missing: set {ENV_API_KEY}")
            }
            Self::Http(err) => write!(f, "provider request failed: {err}"),
            Self::Status { status, detail } => {
                if detail.is_empty() {
                    write!(f, "provider returned status {status}")
                } else {
                    write!(f, "provider returned status {status}: {detail}")
                }
            }
            Self::EmptyCompletion => write!(f, "provider returned no completion choices"),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

/// Lazy sequence of completion text fragments, ended by the upstream
/// terminator; mid-stream transport failures surface as one `Err` item
/// followed by end-of-stream.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
///
/// Holds an immutable config snapshot; per-request overrides are merged
/// before construction, never mutated afterwards. Not `Debug`: the bearer
/// key must stay out of log output.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, config: ModelConfig, api_key: String) -> Self {
        Self {
            http,
            config,
            api_key,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send_completion(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        };
        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                detail: truncate_detail(&detail),
            });
        }
        Ok(response)
    }

    /// Single-shot completion; returns the first choice's text.
    pub async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let response = self.send_completion(messages, false).await?;
        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyCompletion)
    }

    /// Opens a streaming completion and returns the fragment sequence.
    ///
    /// Provider SSE framing (`data:` lines, `[DONE]` sentinel) is decoded
    /// here; callers only see content fragments in generation order.
    /// Dropping the returned stream drops the underlying response and
    /// cancels the upstream request.
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream, ProviderError> {
        let response = self.send_completion(messages, true).await?;
        let state = StreamState {
            bytes: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };
        Ok(Box::pin(futures_util::stream::unfold(state, next_fragment)))
    }
}

struct StreamState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

async fn next_fragment(
    mut state: StreamState,
) -> Option<(Result<String, ProviderError>, StreamState)> {
    loop {
        if let Some(fragment) = state.pending.pop_front() {
            return Some((Ok(fragment), state));
        }
        if state.done {
            return None;
        }
        match state.bytes.next().await {
            None => return None,
            Some(Err(err)) => {
                state.done = true;
                return Some((Err(ProviderError::Http(err)), state));
            }
            Some(Ok(chunk)) => {
                for payload in state.decoder.push(chunk.as_ref()) {
                    if payload == DONE_SENTINEL {
                        state.done = true;
                        break;
                    }
                    if let Some(fragment) = fragment_from_payload(&payload) {
                        state.pending.push_back(fragment);
                    }
                }
            }
        }
    }
}

/// Extracts the delta content from one SSE payload. Payloads that do not
/// parse, or carry no content (role-only deltas, keep-alives), are skipped.
fn fragment_from_payload(payload: &str) -> Option<String> {
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(err) => {
            log::debug!("event=stream_payload_skipped err={err}");
            return None;
        }
    };
    let mut fragment = String::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            fragment.push_str(&content);
        }
    }
    if fragment.is_empty() {
        None
    } else {
        Some(fragment)
    }
}

/// Incremental SSE frame decoder over raw response bytes.
///
/// Buffers until a blank-line event boundary, then yields the `data:`
/// payloads of the completed event. Splitting on bytes keeps multi-byte
/// UTF-8 sequences intact across network chunk boundaries.
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some((end, separator_len)) = event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
            payloads.extend(payloads_from_block(&block[..end]));
        }
        payloads
    }
}

fn event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        if buffer[i] == b'\n' && buffer[i + 1] == b'\n' {
            return Some((i, 2));
        }
        i += 1;
    }
    None
}

fn payloads_from_block(block: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(block);
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|payload| payload.trim_start_matches(' ').to_string())
        .collect()
}

fn truncate_detail(detail: &str) -> String {
    detail.chars().take(ERROR_DETAIL_MAX_CHARS).collect()
}


#[cfg(test)]
mod provider_tests {
    use super::{ChatClient, ProviderError};
    use crate::config::{ModelConfig, ModelOverrides};
    use crate::message::chat_messages;
    use futures_util::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ChatClient {
        let config = ModelConfig::default().merged(&ModelOverrides {
            base_url: Some(server.uri()),
            ..ModelOverrides::default()
        });
        ChatClient::new(reqwest::Client::new(), config, "test-key".to_string())
    }

    #[tokio::test]
    async fn invoke_returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let reply = client
            .invoke(&chat_messages("be helpful", "hi"))
            .await
            .expect("completion");
        assert_eq!(reply, "hello there");
    }

    #[tokio::test]
    async fn invoke_surfaces_upstream_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .invoke(&chat_messages("be helpful", "hi"))
            .await
            .expect_err("must fail");
        match err {
            ProviderError::Status { status, detail } => {
                assert_eq!(status, 500);
                assert_eq!(detail, "upstream exploded");
            }
            other => panic!("expected Status, got {other}"),
        }
    }

    #[tokio::test]
    async fn invoke_without_choices_is_an_empty_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .invoke(&chat_messages("be helpful", "hi"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, ProviderError::EmptyCompletion));
    }

    #[tokio::test]
    async fn stream_yields_fragments_in_generation_order() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let fragments: Vec<String> = client
            .stream(&chat_messages("be helpful", "hi"))
            .await
            .expect("stream opens")
            .map(|item| item.expect("fragment"))
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn stream_open_failure_is_a_pre_stream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .stream(&chat_messages("be helpful", "hi"))
            .await
            .err()
            .expect("open must fail");
        assert!(matches!(err, ProviderError::Status { status: 429, .. }));
    }
}
