use crate::config::Config;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use namio_core::{
    CommandHandle, DfsPath, HttpDirectiveTransport, NamingService, NamioError, Result,
    StorageHandle,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct ServerState {
    pub service: Arc<NamingService>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LockRequest {
    path: String,
    exclusive: bool,
}

#[derive(Debug, Deserialize)]
struct PathRequest {
    path: String,
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    path: String,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    storage_address: String,
    command_address: String,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NodeEntry {
    storage_address: String,
    command_address: String,
    registered_at: String,
}

/// Runs the naming server: both listeners are bound up front (a failure on
/// either aborts startup), then served until a shutdown signal arrives. On
/// shutdown every waiting lock request is cancelled, and the stopped hook
/// fires with the failure cause, if any. The server is not restartable.
pub async fn run_server(config: Config) -> Result<()> {
    let transport =
        HttpDirectiveTransport::new(Duration::from_secs(config.directive.timeout_secs))?;
    let service = Arc::new(NamingService::new(Arc::new(transport)));
    let state = Arc::new(ServerState {
        service: service.clone(),
    });

    let service_listener = tokio::net::TcpListener::bind(&config.service.bind_addr).await?;
    let registration_listener =
        tokio::net::TcpListener::bind(&config.registration.bind_addr).await?;
    tracing::info!("service interface listening on {}", config.service.bind_addr);
    tracing::info!(
        "registration interface listening on {}",
        config.registration.bind_addr
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let service = service.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
            }
            service.shutdown();
            let _ = shutdown_tx.send(true);
        });
    }

    let service_server = axum::serve(service_listener, service_router(state.clone()))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let registration_server = axum::serve(registration_listener, registration_router(state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let result = tokio::try_join!(
        async { service_server.await },
        async { registration_server.await },
    );

    match result {
        Ok(_) => {
            stopped(None);
            Ok(())
        }
        Err(error) => {
            let error = NamioError::Io(error);
            stopped(Some(&error));
            Err(error)
        }
    }
}

// Shutdown hook: reports why the server came down.
fn stopped(cause: Option<&NamioError>) {
    match cause {
        None => tracing::info!("naming server stopped"),
        Some(error) => tracing::error!("naming server stopped: {}", error),
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn service_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/service/lock", post(lock))
        .route("/service/unlock", post(unlock))
        .route("/service/is-directory", get(is_directory))
        .route("/service/list", get(list))
        .route("/service/create-file", post(create_file))
        .route("/service/create-directory", post(create_directory))
        .route("/service/delete", post(delete))
        .route("/service/storage", get(get_storage))
        .with_state(state)
}

fn registration_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/nodes", get(list_nodes))
        .with_state(state)
}

fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }),
    )
        .into_response()
}

fn fail(error: &NamioError) -> Response {
    let status = match error {
        NamioError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        NamioError::NotFound(_) => StatusCode::NOT_FOUND,
        NamioError::AlreadyRegistered(_) => StatusCode::CONFLICT,
        NamioError::NoStorage => StatusCode::SERVICE_UNAVAILABLE,
        NamioError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        NamioError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }),
    )
        .into_response()
}

fn parse_path(raw: &str) -> std::result::Result<DfsPath, Response> {
    DfsPath::parse(raw).map_err(|error| fail(&error))
}

async fn health(State(state): State<Arc<ServerState>>) -> Response {
    let stats = state.service.stats();
    ok(serde_json::json!({
        "files": stats.files,
        "directories": stats.directories,
        "storage_nodes": state.service.nodes().len(),
        "lock_queue_depth": state.service.lock_queue_depth(),
    }))
}

async fn lock(State(state): State<Arc<ServerState>>, Json(req): Json<LockRequest>) -> Response {
    let path = match parse_path(&req.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.service.lock(&path, req.exclusive).await {
        Ok(()) => ok(serde_json::json!({ "locked": true })),
        Err(error) => fail(&error),
    }
}

async fn unlock(State(state): State<Arc<ServerState>>, Json(req): Json<LockRequest>) -> Response {
    let path = match parse_path(&req.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    state.service.unlock(&path, req.exclusive);
    ok(serde_json::json!({ "unlocked": true }))
}

async fn is_directory(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PathQuery>,
) -> Response {
    let path = match parse_path(&query.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.service.is_directory(&path).await {
        Ok(directory) => ok(serde_json::json!({ "directory": directory })),
        Err(error) => fail(&error),
    }
}

async fn list(State(state): State<Arc<ServerState>>, Query(query): Query<PathQuery>) -> Response {
    let path = match parse_path(&query.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.service.list(&path).await {
        Ok(entries) => ok(serde_json::json!({ "entries": entries })),
        Err(error) => fail(&error),
    }
}

async fn create_file(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<PathRequest>,
) -> Response {
    let path = match parse_path(&req.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.service.create_file(&path).await {
        Ok(created) => ok(serde_json::json!({ "created": created })),
        Err(error) => fail(&error),
    }
}

async fn create_directory(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<PathRequest>,
) -> Response {
    let path = match parse_path(&req.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.service.create_directory(&path).await {
        Ok(created) => ok(serde_json::json!({ "created": created })),
        Err(error) => fail(&error),
    }
}

async fn delete(State(state): State<Arc<ServerState>>, Json(req): Json<PathRequest>) -> Response {
    let path = match parse_path(&req.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.service.delete(&path).await {
        Ok(deleted) => ok(serde_json::json!({ "deleted": deleted })),
        Err(error) => fail(&error),
    }
}

async fn get_storage(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PathQuery>,
) -> Response {
    let path = match parse_path(&query.path) {
        Ok(path) => path,
        Err(response) => return response,
    };
    match state.service.get_storage(&path).await {
        Ok(storage) => ok(storage),
        Err(error) => fail(&error),
    }
}

async fn register(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    if req.storage_address.trim().is_empty() || req.command_address.trim().is_empty() {
        return fail(&NamioError::InvalidArgument(
            "storage and command addresses are required".to_string(),
        ));
    }

    let mut files = Vec::with_capacity(req.files.len());
    for raw in &req.files {
        match parse_path(raw) {
            Ok(path) => files.push(path),
            Err(response) => return response,
        }
    }

    let storage = StorageHandle {
        address: req.storage_address,
    };
    let command = CommandHandle {
        address: req.command_address,
    };

    match state.service.register(storage, command, &files).await {
        Ok(rejected) => {
            let rejected: Vec<String> = rejected.iter().map(|p| p.to_string()).collect();
            ok(serde_json::json!({ "rejected": rejected }))
        }
        Err(error) => fail(&error),
    }
}

async fn list_nodes(State(state): State<Arc<ServerState>>) -> Response {
    let nodes: Vec<NodeEntry> = state
        .service
        .nodes()
        .into_iter()
        .map(|site| NodeEntry {
            storage_address: site.storage.address,
            command_address: site.command.address,
            registered_at: site.registered_at.to_rfc3339(),
        })
        .collect();
    ok(nodes)
}
