//! Authorization gateway middleware for Axum.
//!
//! Every protected request carries a credential, either as a `token` query
//! parameter (what noVNC pages send) or as an `Authorization: Bearer` header.
//! The credential is checked against the decision service in two steps and
//! any failure denies the request; there are no retries.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::sidecar::DecisionService;
use crate::error::GatewayError;
use crate::server::GatewayState;

/// Capability every protected endpoint requires
pub const CAPABILITY: &str = "noVNC";

/// Escape characters that are unsafe in markup.
///
/// Applied to every caller-supplied value before it is used to build an
/// outbound request or matched against the configuration.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Query parameter `name` of `uri`, percent-decoded
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Sanitized credential from the `token` query parameter or bearer header
pub fn extract_credential(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let raw = query_param(uri, "token").filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })?;
    Some(sanitize(&raw))
}

/// Validate `credential`, then check it grants [`CAPABILITY`].
///
/// Invalid credential or validation error: 401. Capability denied or
/// decision error: 403.
pub async fn authorize(
    decisions: &dyn DecisionService,
    credential: Option<&str>,
) -> Result<(), GatewayError> {
    let token = credential.ok_or(GatewayError::Unauthenticated("missing credential"))?;

    match decisions.validate(token).await {
        Ok(true) => {}
        Ok(false) => return Err(GatewayError::Unauthenticated("invalid credential")),
        Err(e) => {
            warn!("Credential validation failed: {}", e);
            return Err(GatewayError::Unauthenticated("validation unavailable"));
        }
    }

    match decisions.authorize(token, CAPABILITY).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(GatewayError::Forbidden("capability denied")),
        Err(e) => {
            warn!("Capability decision failed: {}", e);
            Err(GatewayError::Forbidden("decision unavailable"))
        }
    }
}

/// Middleware that requires an authorized credential
pub async fn require_capability(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let credential = extract_credential(request.uri(), request.headers());

    match authorize(state.decisions.as_ref(), credential.as_deref()).await {
        Ok(()) => {
            debug!("Authorized request to {}", request.uri().path());
            next.run(request).await
        }
        Err(e) => {
            warn!("Denied request to {}: {}", request.uri().path(), e);
            e.into_response()
        }
    }
}
