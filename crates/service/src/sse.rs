use std::convert::Infallible;
use std::fmt::Display;

use axum::body::Body;
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Response};
use futures_util::{Stream, StreamExt};

use crate::envelope::now_rfc3339;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// One server-sent event on the relay wire. An envelope is either a
/// content chunk or a terminal (finished/error) event, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEnvelope {
    Chunk { chunk: String, timestamp: String },
    Finished { timestamp: String },
    Error { error: String, message: String },
}

impl StreamEnvelope {
    pub(crate) fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk {
            chunk: text.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub(crate) fn finished() -> Self {
        Self::Finished {
            timestamp: now_rfc3339(),
        }
    }

    pub(crate) fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            message: message.into(),
        }
    }

    /// Renders the envelope as one SSE frame: `data: <json>\n\n`.
    pub(crate) fn to_frame(&self) -> String {
        let json = match self {
            Self::Chunk { chunk, timestamp } => serde_json::json!({
                "success": true,
                "data": {"chunk": chunk, "timestamp": timestamp},
            }),
            Self::Finished { timestamp } => serde_json::json!({
                "success": true,
                "data": {"finished": true, "timestamp": timestamp},
            }),
            Self::Error { error, message } => serde_json::json!({
                "success": false,
                "error": error,
                "message": message,
            }),
        };
        format!("data: {json}\n\n")
    }
}

enum RelayPhase<S> {
    Streaming(S),
    Closed,
}

/// Maps an upstream fragment sequence onto relay frames.
///
/// Fragments pass through in yield order, one frame each; the sequence
/// ends with exactly one terminal frame — `finished` on a clean end, or
/// an error frame if the upstream fails mid-stream. After a mid-stream
/// failure the upstream is dropped, so no further fragments are pulled.
pub(crate) fn relay_frames<S, E>(fragments: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<String, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    futures_util::stream::unfold(RelayPhase::Streaming(fragments), |phase| async move {
        match phase {
            RelayPhase::Closed => None,
            RelayPhase::Streaming(mut fragments) => match fragments.next().await {
                Some(Ok(fragment)) => Some((
                    StreamEnvelope::chunk(fragment).to_frame(),
                    RelayPhase::Streaming(fragments),
                )),
                Some(Err(err)) => {
                    log::warn!("event=stream_relay_error err={err}");
                    Some((
                        StreamEnvelope::error("streaming response error", err.to_string())
                            .to_frame(),
                        RelayPhase::Closed,
                    ))
                }
                None => Some((StreamEnvelope::finished().to_frame(), RelayPhase::Closed)),
            },
        }
    })
}

/// Builds the committed SSE response for a fragment sequence.
///
/// Every header must be in place before the first frame is written: SSE
/// needs them ahead of the body, and intermediaries must be told not to
/// batch chunks. 中文注释：客户端断开时 Body 流被丢弃，上游响应随之 drop 取消，
/// 不会继续拉取片段。
pub(crate) fn relay_response<S, E>(fragments: S) -> Response<Body>
where
    S: Stream<Item = Result<String, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let frames = relay_frames(fragments).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    response
}
