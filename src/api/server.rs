//! HTTP entrypoint: translates axum requests into Contexts and routes them
//! through the handler shell.
//!
//! # Responsibilities
//! - Parse `/v/<n>/<category>[/<id>[/<category>]]` URL shapes into Requests
//! - Negotiate body encoding and extract bearer credentials
//! - Upgrade `/events` (push) and `/wsapi` (API) WebSocket sessions
//! - Wire up middleware (tracing, CORS, panic catching, concurrency cap)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{Method, Request as HttpRequest, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthAction;
use crate::config::ApiConfig;
use crate::context::{CancelGuard, Context};
use crate::handlers::handle_operation;
use crate::lifecycle::ShutdownHandle;
use crate::model::{ApiError, Encoding, Headers, Identity, Operation, Request, Response};
use crate::observability::metrics;
use crate::push::api_session::ApiSession;
use crate::push::session::{run_push_session, Session, SessionKind};
use crate::push::PushServerHandle;
use crate::server::CoreState;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Embedder-provided liveness probe behind the health endpoint.
pub type HealthCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Application state injected into handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) core: Arc<CoreState>,
    pub(crate) push: Option<PushServerHandle>,
    pub(crate) semaphore: Option<Arc<Semaphore>>,
    pub(crate) health: Option<HealthCheck>,
}

/// HTTP server for the API subsystem.
pub(crate) struct ApiServer {
    router: Router,
}

impl ApiServer {
    pub(crate) fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    fn build_router(config: &ApiConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/events", get(push_session_handler))
            .route("/wsapi", get(api_session_handler));

        if !config.health_endpoint.is_empty() {
            router = router.route(&config.health_endpoint, get(health_handler));
        }

        let mut router = router
            .fallback(api_handler)
            .with_state(state)
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http());

        if config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Serve until the shutdown handle resolves.
    pub(crate) async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownHandle,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "API server listening");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// Fallback handler carrying every model-derived route.
async fn api_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    http_request: HttpRequest<Body>,
) -> HttpResponse {
    let _permit = match &state.semaphore {
        Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
        None => None,
    };

    let method = http_request.method().clone();
    let path = http_request.uri().path().to_string();
    let measurement = metrics::measure_request(method.as_str(), &path);

    let headers = http_request.headers().clone();
    let encoding = Encoding::from_accept(
        headers
            .get(axum::http::header::ACCEPT)
            .and_then(|v| v.to_str().ok()),
    );

    let body = match axum::body::to_bytes(http_request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => {
            let response =
                encode_error(encoding, ApiError::bad_request("Unable to read request body"));
            measurement.finish(400);
            return response;
        }
    };

    let request = match resolve_request(
        &state.core,
        &method,
        &path,
        &headers,
        &body,
        encoding,
        addr.ip().to_string(),
    ) {
        Ok(request) => request,
        Err(err) => {
            let code = err.code;
            let response = encode_error(encoding, err);
            measurement.finish(code);
            return response;
        }
    };

    let ctx = Context::new(request);
    let mut guard = CancelGuard::new(ctx.cancel_scope());
    let result = handle_operation(ctx, state.core.clone()).await;
    guard.disarm();

    match result {
        Some(response) => {
            measurement.finish(response.status_code);
            to_http_response(response)
        }
        None => {
            // Client gave up; nothing to write.
            measurement.finish(0);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Parse an URL + method into an operation Request.
fn resolve_request(
    core: &CoreState,
    method: &Method,
    path: &str,
    header_map: &HeaderMap,
    body: &[u8],
    encoding: Encoding,
    client_ip: String,
) -> Result<Request, ApiError> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut version = 0u32;
    if segments.first() == Some(&"v") {
        let Some(raw) = segments.get(1) else {
            return Err(ApiError::bad_request("Missing version number"));
        };
        version = raw
            .parse()
            .map_err(|_| ApiError::bad_request(format!("Invalid version number {raw}")))?;
        segments.drain(..2);
    }

    let Some(manager) = core.manager(version) else {
        return Err(ApiError::bad_request(format!(
            "No model manager for version {version}"
        )));
    };

    let resolve = |category: &str| -> Result<Identity, ApiError> {
        manager
            .identity_from_category(category)
            .ok_or_else(|| ApiError::not_found(format!("No resource matches {path}")))
    };

    let (operation, identity, object_id, parent_identity, parent_id) = match segments.as_slice() {
        [category] => {
            let operation = collection_operation(method, path)?;
            (
                operation,
                resolve(category)?,
                String::new(),
                Identity::root(),
                String::new(),
            )
        }
        [category, id] => {
            let operation = match *method {
                Method::GET => Operation::Retrieve,
                Method::PUT => Operation::Update,
                Method::DELETE => Operation::Delete,
                _ => {
                    return Err(ApiError::not_allowed(format!(
                        "Method {method} not supported on {path}"
                    )))
                }
            };
            (
                operation,
                resolve(category)?,
                id.to_string(),
                Identity::default(),
                String::new(),
            )
        }
        [parent_category, parent_id, category] => {
            let operation = collection_operation(method, path)?;
            (
                operation,
                resolve(category)?,
                String::new(),
                resolve(parent_category)?,
                parent_id.to_string(),
            )
        }
        _ => return Err(ApiError::not_found(format!("No resource matches {path}"))),
    };

    let mut request = Request::new(operation, identity);
    request.object_id = object_id;
    request.parent_identity = parent_identity;
    request.parent_id = parent_id;
    request.version = version;
    request.client_ip = client_ip;
    request.encoding = encoding;

    let mut headers = Headers::new();
    for (name, value) in header_map {
        if let Ok(value) = value.to_str() {
            headers.add(name.as_str(), value);
        }
    }
    request.headers = headers;

    if let Some(token) = bearer_token(header_map) {
        request.set_bearer(token);
    }

    if !body.is_empty() {
        let data = encoding
            .decode::<serde_json::Value>(body)
            .map_err(|e| ApiError::bad_request(format!("Unable to decode body: {e}")))?;
        request.data = Some(data);
    }

    Ok(request)
}

fn collection_operation(method: &Method, path: &str) -> Result<Operation, ApiError> {
    match *method {
        Method::GET => Ok(Operation::RetrieveMany),
        Method::POST => Ok(Operation::Create),
        Method::HEAD => Ok(Operation::Info),
        Method::PATCH => Ok(Operation::Patch),
        _ => Err(ApiError::not_allowed(format!(
            "Method {method} not supported on {path}"
        ))),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn to_http_response(response: Response) -> HttpResponse {
    if !response.redirect.is_empty() {
        return (
            StatusCode::FOUND,
            [(LOCATION, response.redirect.clone())],
        )
            .into_response();
    }

    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = HttpResponse::builder().status(status);
    if matches!(
        response.request.operation,
        Operation::RetrieveMany | Operation::Info
    ) {
        builder = builder.header("X-Count-Total", response.total);
    }
    if !response.messages.is_empty() {
        builder = builder.header("X-Messages", response.messages.join(";"));
    }

    let body = if status == StatusCode::NO_CONTENT || response.data.is_empty() {
        Body::empty()
    } else {
        builder = builder.header(CONTENT_TYPE, response.request.encoding.content_type());
        Body::from(response.data)
    };

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn encode_error(encoding: Encoding, err: ApiError) -> HttpResponse {
    let status = StatusCode::from_u16(err.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match encoding.encode(&[err]) {
        Ok(body) => (
            status,
            [(CONTENT_TYPE, encoding.content_type())],
            body,
        )
            .into_response(),
        Err(_) => status.into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> StatusCode {
    match &state.health {
        Some(check) if !check() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

/// `GET /events`: authenticate, consult the session handler, then register
/// the session and stream events at it.
async fn push_session_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> HttpResponse {
    let Some(push) = state.push.clone() else {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    };

    let session = match admit_session(&state, SessionKind::Push, params, &headers, addr).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        push.register(session.clone()).await;
        run_push_session(session, socket, push).await;
    })
}

/// `GET /wsapi`: same admission flow, then multiplex operation requests.
async fn api_session_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> HttpResponse {
    let session = match admit_session(&state, SessionKind::Api, params, &headers, addr).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };

    let core = state.core.clone();
    let push = state.push.clone();
    ws.on_upgrade(move |socket| async move {
        if let Some(push) = &push {
            push.register(session.clone()).await;
        }
        ApiSession::new(session, core, push).run(socket).await;
    })
}

/// Build a session and run it through the handshake checks: session
/// authenticators first, then the session handler's init hook. Failures
/// refuse the upgrade, so the socket never opens.
async fn admit_session(
    state: &AppState,
    kind: SessionKind,
    params: HashMap<String, String>,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> Result<Arc<Session>, StatusCode> {
    let mut session = Session::new(kind, params, addr.ip().to_string(), None);
    if session.token().is_empty() {
        if let Some(token) = bearer_token(headers) {
            session.set_token(token);
        }
    }
    let session = Arc::new(session);

    for authenticator in &state.core.session_authenticators {
        match authenticator.authenticate_session(&session).await {
            Ok(AuthAction::Ok) => break,
            Ok(AuthAction::Continue) => continue,
            Ok(AuthAction::Ko) => return Err(StatusCode::UNAUTHORIZED),
            Err(err) => {
                return Err(
                    StatusCode::from_u16(err.code).unwrap_or(StatusCode::UNAUTHORIZED)
                )
            }
        }
    }

    if let Some(handler) = &state.core.session_handler {
        match handler.on_push_session_init(&session) {
            Ok(true) => {}
            Ok(false) => return Err(StatusCode::FORBIDDEN),
            Err(err) => {
                return Err(StatusCode::from_u16(err.code).unwrap_or(StatusCode::FORBIDDEN))
            }
        }
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testmodel;

    fn core() -> CoreState {
        CoreState::for_tests(testmodel::manager(), Arc::new(|_| None))
    }

    fn resolve(method: Method, path: &str) -> Result<Request, ApiError> {
        resolve_request(
            &core(),
            &method,
            path,
            &HeaderMap::new(),
            b"",
            Encoding::Json,
            "127.0.0.1".to_string(),
        )
    }

    #[test]
    fn collection_urls_map_to_collection_operations() {
        let request = resolve(Method::GET, "/users").unwrap();
        assert_eq!(request.operation, Operation::RetrieveMany);
        assert_eq!(request.identity.name, "user");
        assert!(request.parent_identity.is_root());

        assert_eq!(
            resolve(Method::POST, "/users").unwrap().operation,
            Operation::Create
        );
        assert_eq!(
            resolve(Method::HEAD, "/users").unwrap().operation,
            Operation::Info
        );
        assert_eq!(
            resolve(Method::PATCH, "/users").unwrap().operation,
            Operation::Patch
        );
    }

    #[test]
    fn object_urls_map_to_single_object_operations() {
        let request = resolve(Method::GET, "/users/xxx").unwrap();
        assert_eq!(request.operation, Operation::Retrieve);
        assert_eq!(request.object_id, "xxx");
        assert!(request.parent_identity.is_empty());

        assert_eq!(
            resolve(Method::PUT, "/users/xxx").unwrap().operation,
            Operation::Update
        );
        assert_eq!(
            resolve(Method::DELETE, "/users/xxx").unwrap().operation,
            Operation::Delete
        );
    }

    #[test]
    fn parented_urls_resolve_both_identities() {
        let request = resolve(Method::GET, "/lists/yyy/users").unwrap();
        assert_eq!(request.operation, Operation::RetrieveMany);
        assert_eq!(request.identity.name, "user");
        assert_eq!(request.parent_identity.name, "list");
        assert_eq!(request.parent_id, "yyy");
    }

    #[test]
    fn versioned_urls_select_the_model_version() {
        let request = resolve(Method::GET, "/v/0/users").unwrap();
        assert_eq!(request.version, 0);
        assert_eq!(request.identity.name, "user");

        let err = resolve(Method::GET, "/v/7/users").unwrap_err();
        assert_eq!(err.code, 400);

        let err = resolve(Method::GET, "/v/abc/users").unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn unknown_categories_yield_404() {
        let err = resolve(Method::GET, "/frogs").unwrap_err();
        assert_eq!(err.code, 404);
    }

    #[test]
    fn unsupported_methods_yield_405() {
        let err = resolve(Method::DELETE, "/users").unwrap_err();
        assert_eq!(err.code, 405);
        let err = resolve(Method::POST, "/users/xxx").unwrap_err();
        assert_eq!(err.code, 405);
    }

    #[test]
    fn bearer_and_body_are_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer tok".parse().unwrap());
        let request = resolve_request(
            &core(),
            &Method::POST,
            "/users",
            &headers,
            br#"{"name":"the name"}"#,
            Encoding::Json,
            "127.0.0.1".to_string(),
        )
        .unwrap();

        assert_eq!(request.username, "Bearer");
        assert_eq!(request.password, "tok");
        assert_eq!(request.data.unwrap()["name"], "the name");
    }

    #[test]
    fn garbage_bodies_yield_400() {
        let err = resolve_request(
            &core(),
            &Method::POST,
            "/users",
            &HeaderMap::new(),
            b"not json",
            Encoding::Json,
            "127.0.0.1".to_string(),
        )
        .unwrap_err();
        assert_eq!(err.code, 400);
    }
}
