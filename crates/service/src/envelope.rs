use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Response, StatusCode};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Timestamp format shared by every envelope, e.g. `2026-08-07T09:15:04.312Z`.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize)]
struct SuccessEnvelope<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: String,
    message: String,
}

/// `200 {"success":true,"data":...}`.
pub(crate) fn json_success<T: Serialize>(data: T) -> Response<Body> {
    json_body(
        StatusCode::OK,
        &SuccessEnvelope {
            success: true,
            data,
        },
    )
}

/// `{"success":false,"error":...,"message":...}` with the given status.
pub(crate) fn json_error(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> Response<Body> {
    json_body(
        status,
        &ErrorEnvelope {
            success: false,
            error: error.to_string(),
            message: message.into(),
        },
    )
}

pub(crate) fn json_body<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body).unwrap_or_else(|err| {
        format!(
            "{{\"success\":false,\"error\":\"serialization failed\",\"message\":\"{err}\"}}"
        )
    });
    let mut response = Response::new(Body::from(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::{json_error, json_success, now_rfc3339};
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::Value;

    async fn body_json(response: axum::http::Response<axum::body::Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn success_envelope_wraps_data() {
        let response = json_success(serde_json::json!({"message": "hi"}));
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["message"], "hi");
    }

    #[tokio::test]
    async fn error_envelope_has_error_and_message() {
        let response = json_error(StatusCode::INTERNAL_SERVER_ERROR, "upstream failed", "boom");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "upstream failed");
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn timestamps_are_utc_with_millis() {
        let timestamp = now_rfc3339();
        assert!(timestamp.ends_with('Z'));
        assert!(timestamp.contains('.'));
    }
}
