//! Routing table
//!
//! Built once from the configuration and read-only afterwards, so it can be
//! shared between request tasks behind an `Arc` without locking.

use crate::config::{Configuration, Forwarding, Vm};
use std::collections::HashMap;

/// Public endpoint lookup over the configured forwardings
#[derive(Debug, Clone)]
pub struct RoutingTable {
    forwardings: Vec<Forwarding>,
    /// default VM endpoint -> forwarding index
    scopes: HashMap<String, usize>,
    /// any VM endpoint -> (forwarding index, position in `Forwarding::vms`)
    endpoints: HashMap<String, (usize, usize)>,
}

impl RoutingTable {
    /// Index a validated configuration
    pub fn from_config(config: &Configuration) -> Self {
        let forwardings = config.forwardings.clone();
        let mut scopes = HashMap::new();
        let mut endpoints = HashMap::new();

        for (fwd_idx, forwarding) in forwardings.iter().enumerate() {
            scopes
                .entry(forwarding.default_vm.web_socket.clone())
                .or_insert(fwd_idx);
            for (vm_idx, vm) in forwarding.vms().enumerate() {
                endpoints
                    .entry(vm.web_socket.clone())
                    .or_insert((fwd_idx, vm_idx));
            }
        }

        Self {
            forwardings,
            scopes,
            endpoints,
        }
    }

    /// Forwarding whose default VM is published at `path`.
    ///
    /// Exact match only; visitable endpoints do not select a scope.
    pub fn resolve_by_public_path(&self, path: &str) -> Option<&Forwarding> {
        self.scopes.get(path).map(|&idx| &self.forwardings[idx])
    }

    /// VM published at `path`, default or visitable
    pub fn resolve_endpoint(&self, path: &str) -> Option<&Vm> {
        let &(fwd_idx, vm_idx) = self.endpoints.get(path)?;
        self.forwardings[fwd_idx].vms().nth(vm_idx)
    }

    /// VM named `name` within one forwarding
    pub fn resolve_by_vm_name<'a>(forwarding: &'a Forwarding, name: &str) -> Option<&'a Vm> {
        forwarding.vms().find(|vm| vm.name == name)
    }

    pub fn forwardings(&self) -> &[Forwarding] {
        &self.forwardings
    }

    /// Number of relay endpoints
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RoutingTable {
        let config = Configuration::from_json(
            r#"{"forwardings":[
                {"defaultVM":{"tcpSocket":"10.0.0.5:5900","webSocket":"ws1","name":"vm1"},
                 "visitableVMs":[{"tcpSocket":"10.0.0.5:5901","webSocket":"ws1b","name":"vm1b"}],
                 "restartableVMs":["vm1"]},
                {"defaultVM":{"tcpSocket":"10.0.0.6:5900","webSocket":"ws2","name":"vm2"}}
            ]}"#,
        )
        .unwrap();
        RoutingTable::from_config(&config)
    }

    #[test]
    fn test_resolve_by_public_path() {
        let table = table();
        assert_eq!(
            table.resolve_by_public_path("ws1").unwrap().default_vm.name,
            "vm1"
        );
        assert_eq!(
            table.resolve_by_public_path("ws2").unwrap().default_vm.name,
            "vm2"
        );
        // visitable endpoints are not scopes
        assert!(table.resolve_by_public_path("ws1b").is_none());
    }

    #[test]
    fn test_exact_match_only() {
        let table = table();
        assert!(table.resolve_by_public_path("ws").is_none());
        assert!(table.resolve_by_public_path("ws1/").is_none());
        assert!(table.resolve_by_public_path("/ws1").is_none());
        assert!(table.resolve_by_public_path("").is_none());
    }

    #[test]
    fn test_resolve_endpoint() {
        let table = table();
        assert_eq!(table.resolve_endpoint("ws1b").unwrap().tcp_socket, "10.0.0.5:5901");
        assert_eq!(table.resolve_endpoint("ws2").unwrap().name, "vm2");
        assert!(table.resolve_endpoint("missing").is_none());
        assert_eq!(table.endpoint_count(), 3);
    }

    #[test]
    fn test_resolve_by_vm_name() {
        let table = table();
        let fwd = table.resolve_by_public_path("ws1").unwrap();
        assert_eq!(
            RoutingTable::resolve_by_vm_name(fwd, "vm1b").unwrap().web_socket,
            "ws1b"
        );
        assert!(RoutingTable::resolve_by_vm_name(fwd, "vm2").is_none());
    }
}
