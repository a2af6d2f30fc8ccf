//! Gateway HTTP server

use crate::action::{
    action_handler, action_query_handler, query_workspace_handler, vm_action_handler,
    vm_query_handler, ActionDispatcher,
};
use crate::auth::{authorize, extract_credential, require_capability, sanitize, DecisionService};
use crate::control::ControlDaemon;
use crate::error::GatewayError;
use crate::relay::TcpRelay;
use crate::static_files::StaticFiles;
use axum::{
    extract::{ws::WebSocketUpgrade, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use vncgate_common::{ActionTokenMinter, Configuration, RoutingTable};

/// Shared, read-only state for all request tasks
pub struct GatewayState {
    pub routing: Arc<RoutingTable>,
    pub decisions: Arc<dyn DecisionService>,
    pub dispatcher: ActionDispatcher,
    pub static_files: StaticFiles,
}

impl GatewayState {
    pub fn new(
        config: &Configuration,
        minter: ActionTokenMinter,
        decisions: Arc<dyn DecisionService>,
        control: Arc<dyn ControlDaemon>,
    ) -> Self {
        let routing = Arc::new(RoutingTable::from_config(config));
        Self {
            dispatcher: ActionDispatcher::new(routing.clone(), minter, control),
            routing,
            decisions,
            static_files: StaticFiles::new(config.web_root.clone()),
        }
    }
}

/// Web server
#[derive(Clone)]
pub struct GatewayServer {
    state: Arc<GatewayState>,
}

impl GatewayServer {
    pub fn new(state: GatewayState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Create router
    pub fn router(&self) -> Router {
        // Protected routes (require an authorized credential)
        let protected_routes = Router::new()
            .route("/action", get(action_handler))
            .route("/vmAction", get(vm_action_handler))
            .route("/queryWorkspace", get(query_workspace_handler))
            .route("/actionQuery", get(action_query_handler))
            .route("/vmQuery", get(vm_query_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_capability,
            ));

        // Everything else is either a relay upgrade (authorized inline) or a
        // public static file.
        Router::new()
            .merge(protected_routes)
            .fallback(fallback_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!(
            "{} relay endpoint(s) configured",
            self.state.routing.endpoint_count()
        );
        for forwarding in self.state.routing.forwardings() {
            for vm in forwarding.vms() {
                info!("Serving WS of {} at /{}", vm.tcp_socket, vm.web_socket);
            }
        }
        if let Some(root) = self.state.static_files.root() {
            info!("Serving {} at {}", root.display(), addr);
        }
        info!("Gateway listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

async fn fallback_handler(
    State(state): State<Arc<GatewayState>>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return state.static_files.serve(request).await;
    }

    let (parts, _body) = request.into_parts();
    match relay_upgrade(&state, ws, &parts).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Rejected relay upgrade for {}: {}", parts.uri.path(), e);
            e.into_response()
        }
    }
}

/// Public endpoint named by a relay request path.
///
/// Percent-decoded, then sanitized like the `path` parameter of the query
/// endpoints, so one identifier resolves the same on both surfaces.
fn endpoint_from_path(path: &str) -> Result<String, GatewayError> {
    let raw = path.trim_start_matches('/');
    let decoded =
        urlencoding::decode(raw).map_err(|_| GatewayError::BadRequest("malformed endpoint"))?;
    Ok(sanitize(&decoded))
}

/// `GET /<endpoint>` with a WebSocket upgrade
async fn relay_upgrade(
    state: &GatewayState,
    ws: Option<WebSocketUpgrade>,
    request: &Parts,
) -> Result<Response, GatewayError> {
    let credential = extract_credential(&request.uri, &request.headers);
    authorize(state.decisions.as_ref(), credential.as_deref()).await?;

    let endpoint = endpoint_from_path(request.uri.path())?;
    let vm = state
        .routing
        .resolve_endpoint(&endpoint)
        .ok_or(GatewayError::BadRequest("unknown endpoint"))?;
    let ws = ws.ok_or(GatewayError::BadRequest("connection not upgradable"))?;

    let relay = TcpRelay::new(&endpoint, &vm.tcp_socket);
    debug!("Upgrading /{} for VM {} ({})", endpoint, vm.name, relay.backend());
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = relay.bridge(socket).await {
            error!("Relay error: {}", e);
        }
    }))
}
