//! vncgate common library
//!
//! Configuration, routing, and action-token primitives shared by the gateway.

pub mod config;
pub mod error;
pub mod routing;
pub mod token;

pub use config::{Configuration, Forwarding, PublicVm, Vm};
pub use error::{Error, Result};
pub use routing::RoutingTable;
pub use token::{ActionClaims, ActionTokenMinter};

/// vncgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
