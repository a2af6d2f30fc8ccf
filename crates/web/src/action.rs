//! Action dispatch
//!
//! Resolves a VM and action against the routing table, mints an action
//! token, and forwards it to the control daemon on the forwarding's
//! hypervisor. All VMs of one forwarding are assumed to share that host, so
//! the daemon is always addressed through the default VM's backend host.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use vncgate_common::{ActionTokenMinter, Forwarding, PublicVm, RoutingTable};

use crate::auth::sanitize;
use crate::control::{ControlDaemon, ControlResponse};
use crate::error::GatewayError;
use crate::server::GatewayState;

/// Decides which VMs and actions a forwarding exposes on one API surface
pub trait ScopeResolution: Send + Sync {
    fn name(&self) -> &'static str;

    /// Is `vm` reachable within `forwarding`?
    fn check_target(&self, forwarding: &Forwarding, vm: &str) -> Result<(), GatewayError>;

    /// Is `operation` permitted within `forwarding`?
    fn check_operation(&self, forwarding: &Forwarding, operation: &str)
        -> Result<(), GatewayError>;
}

/// Whole-workspace surface: default, restartable and visitable VMs
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceScope;

impl ScopeResolution for WorkspaceScope {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn check_target(&self, forwarding: &Forwarding, vm: &str) -> Result<(), GatewayError> {
        let known = forwarding.default_vm.name == vm
            || forwarding.restartable_vms.iter().any(|name| name == vm)
            || RoutingTable::resolve_by_vm_name(forwarding, vm).is_some();
        if known {
            Ok(())
        } else {
            Err(GatewayError::Unauthenticated("VM outside workspace"))
        }
    }

    fn check_operation(
        &self,
        forwarding: &Forwarding,
        operation: &str,
    ) -> Result<(), GatewayError> {
        if forwarding.permits_operation(operation) {
            Ok(())
        } else {
            Err(GatewayError::Forbidden("operation not permitted"))
        }
    }
}

/// Single-VM surface: the default VM and its `otherVMs`
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleVmScope;

impl ScopeResolution for SingleVmScope {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn check_target(&self, forwarding: &Forwarding, vm: &str) -> Result<(), GatewayError> {
        if forwarding.default_vm.name == vm || forwarding.other_vms.iter().any(|name| name == vm) {
            Ok(())
        } else {
            Err(GatewayError::Forbidden("VM not reachable"))
        }
    }

    fn check_operation(
        &self,
        forwarding: &Forwarding,
        operation: &str,
    ) -> Result<(), GatewayError> {
        if forwarding.permits_operation(operation) {
            Ok(())
        } else {
            Err(GatewayError::BadRequest("operation not permitted"))
        }
    }
}

/// Query parameters of the action endpoints, sanitized
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionParams {
    /// Public endpoint of the forwarding's default VM
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub vm: String,
    #[serde(default)]
    pub operation: String,
}

impl ActionParams {
    fn sanitized(self) -> Self {
        Self {
            path: sanitize(&self.path),
            vm: sanitize(&self.vm),
            operation: sanitize(&self.operation),
        }
    }
}

/// Validates action requests and forwards them to the control daemon
#[derive(Clone)]
pub struct ActionDispatcher {
    routing: Arc<RoutingTable>,
    minter: ActionTokenMinter,
    control: Arc<dyn ControlDaemon>,
}

impl ActionDispatcher {
    pub fn new(
        routing: Arc<RoutingTable>,
        minter: ActionTokenMinter,
        control: Arc<dyn ControlDaemon>,
    ) -> Self {
        Self {
            routing,
            minter,
            control,
        }
    }

    /// Forwarding selected by `path`; unknown paths are a bad request
    pub fn forwarding(&self, path: &str) -> Result<&Forwarding, GatewayError> {
        if path.is_empty() {
            return Err(GatewayError::BadRequest("missing path"));
        }
        self.routing
            .resolve_by_public_path(path)
            .ok_or(GatewayError::BadRequest("unknown path"))
    }

    /// Validate and forward one action.
    ///
    /// Checks run in order and the first failure wins: VM name present,
    /// forwarding resolved, VM in scope, action permitted. Exactly one
    /// control daemon call is made when all pass.
    pub async fn dispatch(
        &self,
        scope: &dyn ScopeResolution,
        params: &ActionParams,
    ) -> Result<ControlResponse, GatewayError> {
        if params.vm.is_empty() {
            return Err(GatewayError::BadRequest("missing vm"));
        }
        let forwarding = self.forwarding(&params.path)?;
        scope.check_target(forwarding, &params.vm)?;
        scope.check_operation(forwarding, &params.operation)?;

        let token = self.minter.mint(&params.vm, &params.operation).map_err(|e| {
            error!("Could not mint action token for {}: {}", params.vm, e);
            GatewayError::from(e)
        })?;

        let host = forwarding.default_vm.backend_host();
        info!(
            "Sending {} request for VM {} to control daemon on {} ({} scope)",
            params.operation,
            params.vm,
            host,
            scope.name()
        );

        let response = self.control.send(host, &token).await.map_err(|e| {
            warn!("Control daemon on {} unreachable: {}", host, e);
            GatewayError::Upstream(e.to_string())
        })?;

        info!(
            "Control daemon on {} answered {} for {} of {}",
            host, response.status, params.operation, params.vm
        );
        Ok(response)
    }
}

/// Workspace overview for the noVNC page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub restartable: Vec<String>,
    pub visitable: Vec<PublicVm>,
}

impl WorkspaceInfo {
    pub fn of(forwarding: &Forwarding) -> Self {
        Self {
            restartable: forwarding.restartable_names(),
            visitable: forwarding.visitable(),
        }
    }
}

/// Actions available on one VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmActions {
    pub name: String,
    pub actions: Vec<String>,
    pub other: Vec<String>,
}

impl VmActions {
    pub fn of(forwarding: &Forwarding, name: String) -> Self {
        Self {
            name,
            actions: forwarding.operations.clone(),
            other: forwarding.other_vms.clone(),
        }
    }
}

/// `GET /action?path&vm&operation`
pub async fn action_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ActionParams>,
) -> Response {
    respond(state.dispatcher.dispatch(&WorkspaceScope, &params.sanitized()).await)
}

/// `GET /vmAction?path&vm&operation`
pub async fn vm_action_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ActionParams>,
) -> Response {
    respond(state.dispatcher.dispatch(&SingleVmScope, &params.sanitized()).await)
}

/// `GET /queryWorkspace?path`
pub async fn query_workspace_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ActionParams>,
) -> Response {
    let params = params.sanitized();
    match state.dispatcher.forwarding(&params.path) {
        Ok(forwarding) => Json(WorkspaceInfo::of(forwarding)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /vmQuery?path[&vm]`
pub async fn vm_query_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ActionParams>,
) -> Response {
    let params = params.sanitized();
    let result = state.dispatcher.forwarding(&params.path).and_then(|forwarding| {
        let name = if params.vm.is_empty() {
            forwarding.default_vm.name.clone()
        } else {
            SingleVmScope.check_target(forwarding, &params.vm)?;
            params.vm.clone()
        };
        Ok(VmActions::of(forwarding, name))
    });

    match result {
        Ok(info) => Json(info).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /actionQuery?vm`
///
/// Legacy noVNC clients pass the public endpoint as `vm`; `path` is
/// accepted as well. Answers for the forwarding's default VM.
pub async fn action_query_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ActionParams>,
) -> Response {
    let params = params.sanitized();
    let public_path = if params.vm.is_empty() {
        &params.path
    } else {
        &params.vm
    };

    match state.dispatcher.forwarding(public_path) {
        Ok(forwarding) => {
            Json(VmActions::of(forwarding, forwarding.default_vm.name.clone())).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn respond(result: Result<ControlResponse, GatewayError>) -> Response {
    match result {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            warn!("Action rejected: {}", e);
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlError;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::sync::Mutex;
    use vncgate_common::Configuration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ControlDaemon for Recorder {
        async fn send(&self, host: &str, token: &str) -> Result<ControlResponse, ControlError> {
            self.calls
                .lock()
                .unwrap()
                .push((host.to_string(), token.to_string()));
            Ok(ControlResponse {
                status: StatusCode::OK,
                content_type: None,
                body: Bytes::from_static(b"done"),
            })
        }
    }

    fn forwarding() -> Forwarding {
        Configuration::from_json(
            r#"{"forwardings":[{
                "defaultVM":{"tcpSocket":"10.0.0.5:5900","webSocket":"ws1","name":"vm1"},
                "visitableVMs":[{"tcpSocket":"10.0.0.5:5901","webSocket":"ws1b","name":"vm1b"}],
                "restartableVMs":["router"],
                "operations":["restart","reset"],
                "otherVMs":["db"]
            }]}"#,
        )
        .unwrap()
        .forwardings
        .remove(0)
    }

    fn dispatcher(recorder: Arc<Recorder>, minter: ActionTokenMinter) -> ActionDispatcher {
        let config = Configuration {
            http_port: 6080,
            web_root: None,
            forwardings: vec![forwarding()],
        };
        ActionDispatcher::new(
            Arc::new(RoutingTable::from_config(&config)),
            minter,
            recorder,
        )
    }

    fn params(path: &str, vm: &str, operation: &str) -> ActionParams {
        ActionParams {
            path: path.into(),
            vm: vm.into(),
            operation: operation.into(),
        }
    }

    #[test]
    fn test_workspace_scope() {
        let fwd = forwarding();
        for vm in ["vm1", "vm1b", "router"] {
            assert!(WorkspaceScope.check_target(&fwd, vm).is_ok(), "{}", vm);
        }
        assert_eq!(
            WorkspaceScope.check_target(&fwd, "db").unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WorkspaceScope.check_operation(&fwd, "wipe").unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_single_vm_scope() {
        let fwd = forwarding();
        assert!(SingleVmScope.check_target(&fwd, "vm1").is_ok());
        assert!(SingleVmScope.check_target(&fwd, "db").is_ok());
        assert_eq!(
            SingleVmScope.check_target(&fwd, "vm1b").unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            SingleVmScope.check_operation(&fwd, "wipe").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_dispatch_sends_one_call_to_default_host() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(recorder.clone(), ActionTokenMinter::new(b"k"));

        let reply = d
            .dispatch(&WorkspaceScope, &params("ws1", "vm1b", "reset"))
            .await
            .unwrap();
        assert_eq!(reply.status, StatusCode::OK);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_validation_order() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(recorder.clone(), ActionTokenMinter::new(b"k"));

        let cases = [
            (params("nope", "", "wipe"), StatusCode::BAD_REQUEST),
            (params("nope", "vm1", "wipe"), StatusCode::BAD_REQUEST),
            (params("", "vm1", "restart"), StatusCode::BAD_REQUEST),
            (params("ws1", "ghost", "wipe"), StatusCode::UNAUTHORIZED),
            (params("ws1", "vm1", "wipe"), StatusCode::FORBIDDEN),
            (params("ws1", "vm1", ""), StatusCode::FORBIDDEN),
        ];
        for (p, expected) in cases {
            let err = d.dispatch(&WorkspaceScope, &p).await.unwrap_err();
            assert_eq!(err.status(), expected, "{:?}", p);
        }
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_call() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher(recorder.clone(), ActionTokenMinter::disabled());

        let err = d
            .dispatch(&WorkspaceScope, &params("ws1", "vm1", "restart"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_workspace_info_shape() {
        let info = WorkspaceInfo::of(&forwarding());
        assert_eq!(
            serde_json::to_value(info).unwrap(),
            serde_json::json!({
                "restartable": ["vm1", "router", "vm1b"],
                "visitable": [
                    {"webSocket": "ws1", "name": "vm1"},
                    {"webSocket": "ws1b", "name": "vm1b"}
                ]
            })
        );
    }

    #[test]
    fn test_vm_actions_shape() {
        let fwd = forwarding();
        let info = VmActions::of(&fwd, fwd.default_vm.name.clone());
        assert_eq!(
            serde_json::to_value(info).unwrap(),
            serde_json::json!({
                "name": "vm1",
                "actions": ["restart", "reset"],
                "other": ["db"]
            })
        );
    }

    #[test]
    fn test_params_are_sanitized() {
        let p = params("ws1<", "vm'1", "a&b").sanitized();
        assert_eq!(p.path, "ws1&lt;");
        assert_eq!(p.vm, "vm&#39;1");
        assert_eq!(p.operation, "a&amp;b");
    }
}
