//! Gateway configuration
//!
//! The configuration is a JSON document loaded once at startup:
//!
//! ```json
//! {
//!   "httpPort": 6080,
//!   "webRoot": "/srv/novnc",
//!   "forwardings": [{
//!     "defaultVM": {"tcpSocket": "10.0.0.5:5900", "webSocket": "ws1", "name": "vm1"},
//!     "visitableVMs": [{"tcpSocket": "10.0.0.5:5901", "webSocket": "ws2", "name": "vm2"}],
//!     "restartableVMs": ["router"],
//!     "operations": ["restart"],
//!     "otherVMs": ["router"]
//!   }]
//! }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 6080;

/// Public endpoint served when no configuration file is given
pub const DEFAULT_ENDPOINT: &str = "websockify";

/// Action permitted when a forwarding does not list any
pub const DEFAULT_OPERATION: &str = "restart";

/// A virtual machine reachable through the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    /// Backend display socket, `host:port`
    pub tcp_socket: String,
    /// Public endpoint identifier (URL path segment)
    pub web_socket: String,
    /// Display name, also the name the control daemon knows the VM by
    pub name: String,
}

impl Vm {
    /// Host portion of the backend TCP address.
    ///
    /// Everything before the last `:`, so bracketed IPv6 literals stay intact.
    pub fn backend_host(&self) -> &str {
        match self.tcp_socket.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.tcp_socket,
        }
    }

    /// Public view of this VM (never exposes the backend address)
    pub fn public(&self) -> PublicVm {
        PublicVm {
            web_socket: self.web_socket.clone(),
            name: self.name.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "VM behind endpoint {:?} has no name",
                self.web_socket
            )));
        }
        if self.web_socket.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "VM {:?} has no webSocket endpoint",
                self.name
            )));
        }
        let valid_socket = self
            .tcp_socket
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid_socket {
            return Err(Error::InvalidConfig(format!(
                "VM {:?} has invalid tcpSocket {:?} (expected host:port)",
                self.name, self.tcp_socket
            )));
        }
        Ok(())
    }
}

/// VM as reported to browser clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicVm {
    pub web_socket: String,
    pub name: String,
}

/// A routing and authorization scope: VMs believed to share one hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Forwarding {
    #[serde(rename = "defaultVM")]
    pub default_vm: Vm,

    #[serde(rename = "visitableVMs", default)]
    pub visitable_vms: Vec<Vm>,

    #[serde(rename = "restartableVMs", default)]
    pub restartable_vms: Vec<String>,

    /// Actions that may be dispatched within this forwarding
    #[serde(default = "default_operations")]
    pub operations: Vec<String>,

    /// Further VM names reachable for arbitrary actions
    #[serde(rename = "otherVMs", default)]
    pub other_vms: Vec<String>,
}

fn default_operations() -> Vec<String> {
    vec![DEFAULT_OPERATION.to_string()]
}

impl Forwarding {
    /// Forwarding with a single default VM and default operations
    pub fn single(vm: Vm) -> Self {
        Self {
            default_vm: vm,
            visitable_vms: Vec::new(),
            restartable_vms: Vec::new(),
            operations: default_operations(),
            other_vms: Vec::new(),
        }
    }

    /// Default VM followed by the visitable VMs
    pub fn vms(&self) -> impl Iterator<Item = &Vm> {
        std::iter::once(&self.default_vm).chain(self.visitable_vms.iter())
    }

    /// Names eligible for a restart-class action.
    ///
    /// Default VM first, then the listed restartable names, then every
    /// visitable VM. Duplicates are kept.
    pub fn restartable_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(1 + self.restartable_vms.len() + self.visitable_vms.len());
        names.push(self.default_vm.name.clone());
        names.extend(self.restartable_vms.iter().cloned());
        names.extend(self.visitable_vms.iter().map(|vm| vm.name.clone()));
        names
    }

    /// Public views of the default and visitable VMs
    pub fn visitable(&self) -> Vec<PublicVm> {
        self.vms().map(Vm::public).collect()
    }

    pub fn permits_operation(&self, operation: &str) -> bool {
        self.operations.iter().any(|op| op == operation)
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub web_root: Option<PathBuf>,

    pub forwardings: Vec<Forwarding>,
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

impl Configuration {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        debug!(
            "Loaded {} forwarding(s) from {}",
            config.forwardings.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse and validate a configuration document
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration serving one backend at the default endpoint
    pub fn single_target(tcp_socket: &str, http_port: u16) -> Result<Self> {
        let config = Self {
            http_port,
            web_root: None,
            forwardings: vec![Forwarding::single(Vm {
                tcp_socket: tcp_socket.to_string(),
                web_socket: DEFAULT_ENDPOINT.to_string(),
                name: "default".to_string(),
            })],
        };
        config.validate()?;
        Ok(config)
    }

    /// Check per-VM fields and global uniqueness of public endpoints
    pub fn validate(&self) -> Result<()> {
        let mut endpoints = HashSet::new();
        for forwarding in &self.forwardings {
            for vm in forwarding.vms() {
                vm.validate()?;
                if !endpoints.insert(vm.web_socket.as_str()) {
                    return Err(Error::DuplicateEndpoint(vm.web_socket.clone()));
                }
            }
        }
        Ok(())
    }
}
