//! Client for the external token-validation and policy-decision service.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("decision service URL not configured")]
    NotConfigured,

    #[error("invalid decision service URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    /// Carries no request URL, which would include the credential
    #[error("decision service request failed: {0}")]
    Transport(reqwest::Error),

    #[error("decision service returned {0}")]
    Status(StatusCode),
}

impl DecisionError {
    fn transport(e: reqwest::Error) -> Self {
        Self::Transport(e.without_url())
    }
}

/// Validates credentials and answers capability questions.
///
/// Any error is treated by callers as a denial.
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Whether `token` is a valid credential
    async fn validate(&self, token: &str) -> Result<bool, DecisionError>;

    /// Whether `token` grants access to `service`
    async fn authorize(&self, token: &str, service: &str) -> Result<bool, DecisionError>;
}

#[derive(Debug, Deserialize)]
struct ValidationResult {
    #[serde(default)]
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct AuthDecision {
    #[serde(default)]
    allowed: bool,
}

/// HTTP sidecar exposing `/validate` and `/auth`
#[derive(Debug, Clone)]
pub struct SidecarClient {
    base: Option<String>,
    http: reqwest::Client,
}

impl SidecarClient {
    /// Create a client for `base`.
    ///
    /// A bare `host:port` is treated as `http://host:port`. With no base every
    /// call fails, which denies every request.
    pub fn new(base: Option<&str>) -> Result<Self, DecisionError> {
        let base = match base.map(str::trim).filter(|b| !b.is_empty()) {
            Some(raw) => {
                let candidate = if raw.contains("://") {
                    raw.to_string()
                } else {
                    format!("http://{}", raw)
                };
                url::Url::parse(&candidate)
                    .map_err(|e| DecisionError::InvalidUrl(raw.to_string(), e))?;
                Some(candidate.trim_end_matches('/').to_string())
            }
            None => None,
        };

        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base.is_some()
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DecisionError> {
        let base = self.base.as_deref().ok_or(DecisionError::NotConfigured)?;
        let url = format!("{}/{}", base, endpoint);
        trace!("Querying decision service at {}", url);

        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(DecisionError::transport)?;
        if !resp.status().is_success() {
            return Err(DecisionError::Status(resp.status()));
        }
        resp.json::<T>().await.map_err(DecisionError::transport)
    }
}

#[async_trait]
impl DecisionService for SidecarClient {
    async fn validate(&self, token: &str) -> Result<bool, DecisionError> {
        let result: ValidationResult = self.get("validate", &[("token", token)]).await?;
        Ok(result.valid)
    }

    async fn authorize(&self, token: &str, service: &str) -> Result<bool, DecisionError> {
        let decision: AuthDecision = self
            .get("auth", &[("token", token), ("service", service)])
            .await?;
        Ok(decision.allowed)
    }
}
