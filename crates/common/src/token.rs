//! Action tokens
//!
//! Short-lived HS256 JWTs handed to the VM-local control daemon. The gateway
//! only issues them; signature and time window are checked by the daemon.

use crate::{Error, Result};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Seconds of clock skew tolerated on either side of the issue time
pub const TOKEN_SKEW_SECS: i64 = 5;

/// Claims carried by an action token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionClaims {
    /// Target VM name
    pub vm: String,
    /// Requested action
    pub operation: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl ActionClaims {
    pub fn new(vm: &str, operation: &str, iat: i64) -> Self {
        Self {
            vm: vm.to_string(),
            operation: operation.to_string(),
            iat,
            nbf: iat - TOKEN_SKEW_SECS,
            exp: iat + TOKEN_SKEW_SECS,
        }
    }
}

/// Issues signed action tokens with the process-wide shared secret
#[derive(Clone)]
pub struct ActionTokenMinter {
    key: Option<EncodingKey>,
}

impl ActionTokenMinter {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Some(EncodingKey::from_secret(secret)),
        }
    }

    /// Minter from an optional secret; empty counts as missing
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret.filter(|s| !s.is_empty()) {
            Some(s) => Self::new(s.as_bytes()),
            None => Self::disabled(),
        }
    }

    /// Minter that fails every mint with [`Error::MissingSigningKey`]
    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Sign a token for `vm`/`operation` issued now
    pub fn mint(&self, vm: &str, operation: &str) -> Result<String> {
        self.mint_at(vm, operation, Utc::now().timestamp())
    }

    /// Sign a token for `vm`/`operation` issued at `iat` (unix seconds)
    pub fn mint_at(&self, vm: &str, operation: &str, iat: i64) -> Result<String> {
        let key = self.key.as_ref().ok_or(Error::MissingSigningKey)?;
        let claims = ActionClaims::new(vm, operation, iat);
        Ok(encode(&Header::default(), &claims, key)?)
    }
}

impl std::fmt::Debug for ActionTokenMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTokenMinter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
