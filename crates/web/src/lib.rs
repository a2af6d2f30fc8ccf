//! vncgate web gateway
//!
//! Exposes VM display sockets to noVNC browser clients over WebSockets and
//! brokers VM control actions through signed, short-lived tokens.

pub mod action;
pub mod auth;
pub mod control;
pub mod error;
pub mod relay;
pub mod server;
pub mod static_files;

pub use action::{ActionDispatcher, ScopeResolution, SingleVmScope, WorkspaceScope};
pub use auth::{DecisionService, SidecarClient};
pub use control::{ControlDaemon, ControlResponse, HttpControlDaemon, DEFAULT_CONTROL_PORT};
pub use error::GatewayError;
pub use relay::TcpRelay;
pub use server::{GatewayServer, GatewayState};
