//! Static file serving
//!
//! Serves the noVNC pages from the configured web root. Responses are marked
//! `no-cache` so browsers pick up a redeployed client immediately.

use axum::{
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeDir;

/// Static file handler
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    root: Option<PathBuf>,
}

impl StaticFiles {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&PathBuf> {
        self.root.as_ref()
    }

    /// Serve a file below the web root
    pub async fn serve(&self, request: Request) -> Response {
        let Some(root) = &self.root else {
            return (StatusCode::NOT_FOUND, "Not Found").into_response();
        };

        let result: Result<_, Infallible> = ServeDir::new(root).oneshot(request).await;
        let mut response = match result {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        };
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tempfile::TempDir;

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_with_no_cache() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("vnc.html"), "<html></html>").unwrap();

        let files = StaticFiles::new(Some(tmp.path().to_path_buf()));
        let response = files.serve(get("/vnc.html")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<html></html>");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let tmp = TempDir::new().unwrap();
        let files = StaticFiles::new(Some(tmp.path().to_path_buf()));
        assert_eq!(files.serve(get("/nope.js")).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_no_web_root() {
        let files = StaticFiles::default();
        assert_eq!(files.serve(get("/index.html")).await.status(), StatusCode::NOT_FOUND);
    }
}
