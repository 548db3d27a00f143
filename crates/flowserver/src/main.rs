use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, ResponseError, Result as ActixResult,
};
use flowcore::dispatch::{
    CannotRunRequest, FinishRequest, NextFileRequest, RegisterRequest, ResetRequest, ResetResponse,
};
use flowcore::{Configuration, DispatchError};
use flowdispatch::{DispatchConfig, MemoryStore, Scanner, Store, SystemClock, WorkQueue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    queue: Arc<WorkQueue>,
}

/// Settings read from the environment
#[derive(Debug, Clone)]
struct ServerConfig {
    bind_address: String,
    configuration: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    scan_interval: Duration,
}

impl ServerConfig {
    fn from_env() -> Self {
        let scan_secs = std::env::var("FLOW_SCAN_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            configuration: std::env::var_os("FLOW_CONFIG").map(PathBuf::from),
            snapshot: std::env::var_os("FLOW_DATA").map(PathBuf::from),
            scan_interval: Duration::from_secs(scan_secs),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError(DispatchError);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self.0 {
            DispatchError::FileNotFound(_) | DispatchError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidStatus { .. } | DispatchError::NotOwner { .. } => StatusCode::CONFLICT,
            DispatchError::InvalidResult(_) | DispatchError::Rejected(_) => StatusCode::BAD_REQUEST,
            DispatchError::Store(_) | DispatchError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.0.to_string(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReprocessRequest {
    #[serde(default)]
    flow_uid: Option<Uuid>,
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowserver"
    }))
}

#[post("/api/node/register")]
async fn register_node(
    data: web::Data<AppState>,
    req: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let node = data.queue.register_node(req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(node))
}

/// Next file for a worker; `null` when there is nothing to do
#[post("/api/work/next")]
async fn next_file(
    data: web::Data<AppState>,
    req: web::Json<NextFileRequest>,
) -> Result<HttpResponse, ApiError> {
    let file = data.queue.get_next(req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(file))
}

#[post("/api/node/cannot-run")]
async fn node_cannot_run(
    data: web::Data<AppState>,
    req: web::Json<CannotRunRequest>,
) -> Result<HttpResponse, ApiError> {
    data.queue.node_cannot_run(req.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/work/finish")]
async fn finish_processing(
    data: web::Data<AppState>,
    req: web::Json<FinishRequest>,
) -> Result<HttpResponse, ApiError> {
    data.queue.finish_processing(req.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/work/reset")]
async fn reset_processing(
    data: web::Data<AppState>,
    req: Option<web::Json<ResetRequest>>,
) -> Result<HttpResponse, ApiError> {
    let node = req.and_then(|r| r.into_inner().node_uid);
    let reset = data.queue.reset_processing_status(node).await?;
    Ok(HttpResponse::Ok().json(ResetResponse { reset }))
}

#[get("/api/files")]
async fn list_files(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let files = data.queue.store().files().await.map_err(DispatchError::from)?;
    Ok(HttpResponse::Ok().json(files))
}

#[get("/api/files/{id}/log")]
async fn file_log(data: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, ApiError> {
    let uid = path.into_inner();
    match data.queue.file_log(uid).await? {
        Some(lines) => Ok(HttpResponse::Ok().json(lines)),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("No log for file {}", uid),
        })),
    }
}

#[post("/api/files/{id}/reprocess")]
async fn reprocess_file(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: Option<web::Json<ReprocessRequest>>,
) -> Result<HttpResponse, ApiError> {
    let flow = req.and_then(|r| r.into_inner().flow_uid);
    data.queue.reprocess(path.into_inner(), flow).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/files/{id}/force")]
async fn force_reprocess(data: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, ApiError> {
    data.queue.force_reprocess(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/files/top")]
async fn move_to_top(data: web::Data<AppState>, req: web::Json<Vec<Uuid>>) -> Result<HttpResponse, ApiError> {
    data.queue.move_to_top(&req.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// List known processing nodes
#[get("/api/nodes")]
async fn list_nodes(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.queue.store().nodes().await {
        Ok(nodes) => Ok(HttpResponse::Ok().json(nodes)),
        Err(e) => Ok(HttpResponse::InternalServerError().json(ErrorResponse {
            error: e.to_string(),
        })),
    }
}

/// Scan libraries and recompute the waiting lanes on an interval
async fn maintenance(queue: Arc<WorkQueue>, interval: Duration) {
    let scanner = Scanner::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let libraries = match queue.store().libraries().await {
            Ok(libraries) => libraries,
            Err(e) => {
                error!("could not list libraries: {}", e);
                continue;
            }
        };
        for library in &libraries {
            if let Err(e) = scanner.scan(&queue, library).await {
                warn!(library = %library.name, "scan failed: {}", e);
            }
        }
        match queue.refresh_statuses().await {
            Ok(0) => {}
            Ok(changed) => info!(changed, "Refreshed file statuses"),
            Err(e) => error!("status refresh failed: {}", e),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("🚀 Starting Flow Coordinator");

    let store: Arc<dyn Store> = match &config.snapshot {
        Some(path) => Arc::new(MemoryStore::open(path.clone()).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let queue = Arc::new(WorkQueue::new(store, Arc::new(SystemClock), DispatchConfig::default()));

    if let Some(path) = &config.configuration {
        let configuration = Configuration::from_json_file(path)?;
        queue
            .set_known_flows(configuration.flows.iter().map(|f| (f.uid, f.name.clone())))
            .await;
        for library in configuration.libraries {
            queue.add_library(library).await?;
        }
        info!(flows = configuration.flows.len(), "✅ Configuration loaded from {}", path.display());
    }

    // nothing can be in flight on a fresh start
    let reset = queue.reset_processing_status(None).await?;
    if reset > 0 {
        warn!(count = reset, "Released files left in processing by a previous run");
    }

    tokio::spawn(maintenance(queue.clone(), config.scan_interval));

    let app_state = web::Data::new(AppState { queue });

    info!("🌐 Server starting on http://{}", config.bind_address);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(register_node)
            .service(next_file)
            .service(node_cannot_run)
            .service(finish_processing)
            .service(reset_processing)
            .service(list_files)
            .service(file_log)
            .service(move_to_top)
            .service(reprocess_file)
            .service(force_reprocess)
            .service(list_nodes)
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};
    use flowcore::{FileStatus, Library, LibraryFile, ProcessingNode};

    async fn create_state() -> (web::Data<AppState>, Library) {
        let queue = Arc::new(WorkQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            DispatchConfig::default(),
        ));
        let library = Library::new("Movies", "/media").with_flow(Uuid::new_v4());
        queue.add_library(library.clone()).await.unwrap();
        (web::Data::new(AppState { queue }), library)
    }

    #[actix_web::test]
    async fn test_node_round_trip() {
        let (state, library) = create_state().await;
        let file = state
            .queue
            .add_file(library.uid, "/media/a.mkv", None)
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(register_node)
                .service(next_file)
                .service(finish_processing)
                .service(file_log),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/node/register")
            .set_json(serde_json::json!({ "address": "node-1", "flow_runners": 1 }))
            .to_request();
        let node: ProcessingNode = test::call_and_read_body_json(&app, req).await;

        let worker = Uuid::new_v4();
        let req = test::TestRequest::post()
            .uri("/api/work/next")
            .set_json(serde_json::json!({
                "node_name": node.name,
                "node_uid": node.uid,
                "worker_uid": worker,
            }))
            .to_request();
        let claimed: Option<LibraryFile> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(claimed.map(|f| f.uid), Some(file.uid));

        let finish = |worker: Uuid| {
            test::TestRequest::post()
                .uri("/api/work/finish")
                .set_json(serde_json::json!({
                    "file_uid": file.uid,
                    "worker_uid": worker,
                    "status": "Processed",
                    "log": ["ok"],
                }))
                .to_request()
        };
        let resp = test::call_service(&app, finish(Uuid::new_v4())).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT, "only the owner may finish");
        let resp = test::call_service(&app, finish(worker)).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let stored = state.queue.file(file.uid).await.unwrap().unwrap();
        assert_eq!(stored.status, FileStatus::Processed);

        let req = test::TestRequest::get()
            .uri(&format!("/api/files/{}/log", file.uid))
            .to_request();
        let log: Vec<String> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(log, vec!["ok".to_string()]);
    }

    #[actix_web::test]
    async fn test_error_status_codes() {
        let uid = Uuid::new_v4();
        assert_eq!(ApiError(DispatchError::FileNotFound(uid)).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(DispatchError::InvalidResult(FileStatus::Duplicate)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(DispatchError::Store("disk".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
