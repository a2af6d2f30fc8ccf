//! Request-level errors
//!
//! Every variant maps to an HTTP status; the response body is only the
//! canonical reason phrase so callers cannot tell an unknown routing target
//! from one they are not allowed to see.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or invalid credential, or target VM outside the workspace
    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),

    /// Capability or action denied
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Missing parameter or unresolvable routing target
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// Control daemon unreachable
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<vncgate_common::Error> for GatewayError {
    fn from(e: vncgate_common::Error) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            status.canonical_reason().unwrap_or_default(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Unauthenticated("x").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(GatewayError::Forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::BadRequest("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::Upstream("down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_body_is_reason_phrase() {
        let response = GatewayError::BadRequest("unknown path").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Bad Request");
    }
}
