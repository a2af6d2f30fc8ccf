//! VM-local control daemon client
//!
//! Every VM host runs a control daemon on a fixed port that executes an
//! operation when presented with a valid action token. Its reply is passed
//! back to the browser unchanged.

use async_trait::async_trait;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use thiserror::Error;

/// Port the control daemon listens on
pub const DEFAULT_CONTROL_PORT: u16 = 25000;

#[derive(Error, Debug)]
pub enum ControlError {
    /// Carries no request URL, which would include the action token
    #[error("control daemon request failed: {0}")]
    Transport(reqwest::Error),
}

/// Reply from the control daemon
#[derive(Debug, Clone)]
pub struct ControlResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for ControlResponse {
    fn into_response(self) -> Response {
        let content_type = self
            .content_type
            .unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8"));
        (self.status, [(header::CONTENT_TYPE, content_type)], self.body).into_response()
    }
}

#[async_trait]
pub trait ControlDaemon: Send + Sync {
    /// Present `token` to the daemon on `host`
    async fn send(&self, host: &str, token: &str) -> Result<ControlResponse, ControlError>;
}

/// Control daemon reached over plain HTTP
#[derive(Debug, Clone)]
pub struct HttpControlDaemon {
    port: u16,
    http: reqwest::Client,
}

impl HttpControlDaemon {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            http: reqwest::Client::new(),
        }
    }

    pub fn url_for(&self, host: &str) -> String {
        format!("http://{}:{}/", host, self.port)
    }
}

impl Default for HttpControlDaemon {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_PORT)
    }
}

#[async_trait]
impl ControlDaemon for HttpControlDaemon {
    async fn send(&self, host: &str, token: &str) -> Result<ControlResponse, ControlError> {
        let resp = self
            .http
            .get(self.url_for(host))
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.without_url()))?;

        let status = resp.status();
        let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ControlError::Transport(e.without_url()))?;

        Ok(ControlResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Router};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_status_and_body_relayed() {
        async fn daemon(Query(q): Query<HashMap<String, String>>) -> (StatusCode, String) {
            match q.get("token").map(String::as_str) {
                Some("tok") => (StatusCode::ACCEPTED, "restarting".to_string()),
                _ => (StatusCode::UNAUTHORIZED, "bad token".to_string()),
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", get(daemon)))
                .await
                .unwrap();
        });

        let control = HttpControlDaemon::new(port);
        let ok = control.send("127.0.0.1", "tok").await.unwrap();
        assert_eq!(ok.status, StatusCode::ACCEPTED);
        assert_eq!(&ok.body[..], b"restarting");

        let denied = control.send("127.0.0.1", "other").await.unwrap();
        assert_eq!(denied.status, StatusCode::UNAUTHORIZED);
        assert_eq!(&denied.body[..], b"bad token");
    }

    #[tokio::test]
    async fn test_unreachable_daemon() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let control = HttpControlDaemon::new(port);
        let err = control.send("127.0.0.1", "signed.action.token").await.unwrap_err();
        assert!(!err.to_string().contains("signed.action.token"));
        assert!(!format!("{:?}", err).contains("signed.action.token"));
    }

    #[test]
    fn test_url() {
        assert_eq!(
            HttpControlDaemon::default().url_for("10.0.0.5"),
            "http://10.0.0.5:25000/"
        );
    }
}
