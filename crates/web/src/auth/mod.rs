//! Authorization gateway.
//!
//! Credentials are never interpreted locally: an external sidecar decides
//! whether a token is valid and whether it grants the `noVNC` capability.

pub mod middleware;
pub mod sidecar;

pub use middleware::{authorize, extract_credential, require_capability, sanitize, CAPABILITY};
pub use sidecar::{DecisionError, DecisionService, SidecarClient};
