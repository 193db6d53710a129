//! Structured error bodies: `{"error": {"kind": ..., "message": ...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use chatrelay_core::{Error, StreamError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: &'a str,
}

impl ApiError {
    pub fn bad_request(kind: &str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// HTTP status for an error kind.
fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::ConfigNotFound { .. } => StatusCode::NOT_FOUND,
        Error::ConfigCycle { .. } | Error::Config { .. } | Error::MalformedAssistantSet(_) => StatusCode::BAD_REQUEST,
        Error::Tool(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::ContextConflict { .. } => StatusCode::CONFLICT,
        Error::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Stream(StreamError::Expired(_)) => StatusCode::GONE,
        Error::Stream(_) | Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Serialization(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            status: status_for(&err),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        Error::Stream(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: &self.kind,
                message: &self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::{BackendError, ToolError};

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (Error::ConfigNotFound { name: "x".into() }, StatusCode::NOT_FOUND, "config-not-found"),
            (Error::ContextConflict { token: "t".into() }, StatusCode::CONFLICT, "context-conflict"),
            (Error::Timeout { after_secs: 90 }, StatusCode::GATEWAY_TIMEOUT, "timeout"),
            (
                Error::BackendUnavailable(BackendError::Network("reset".into())),
                StatusCode::BAD_GATEWAY,
                "backend-unavailable",
            ),
            (
                Error::Tool(ToolError::UnknownTool("nope".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown-tool",
            ),
        ];
        for (err, status, kind) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
            assert_eq!(api.kind, kind);
        }
    }

    #[test]
    fn expired_stream_is_gone() {
        let api: ApiError = StreamError::Expired("s1".into()).into();
        assert_eq!(api.status, StatusCode::GONE);
        assert_eq!(api.kind, "stream-unavailable");
    }
}
