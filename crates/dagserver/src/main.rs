use actix_cors::Cors;
use actix_web::{
    delete, get, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder,
    Result as ActixResult,
};
use actix_ws::Message;
use dagcore::{Caller, CodeRuntime, FlowError, NodeType, Visibility, Workflow, WorkflowError};
use dagruntime::{EngineConfig, FileRunStore, FlowRuntime, MemoryStore, NodeTypeCatalog, RunStore, WorkflowStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Header carrying the authenticated user id
const USER_HEADER: &str = "X-User-Id";

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
    store: Arc<MemoryStore>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct CreatedResponse {
    id: String,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_body(error: impl ToString) -> ErrorResponse {
    ErrorResponse {
        error: error.to_string(),
    }
}

/// Caller identity from the request; requests without one see public data only
fn caller(req: &HttpRequest) -> Option<Caller> {
    req.headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Caller::new)
}

fn visibility(caller: Option<&Caller>) -> Visibility {
    match caller {
        Some(caller) => Visibility::VisibleTo(caller.clone()),
        None => Visibility::Public,
    }
}

fn workflow_visible(workflow: &Workflow, caller: Option<&Caller>) -> bool {
    workflow.is_public || caller.is_some_and(|c| workflow.is_visible_to(c))
}

/// Whether `caller` may replace or delete an entry owned by `owner_id`.
///
/// Ownerless entries, such as the builtin catalog, are read-only.
fn may_modify(owner_id: Option<&str>, caller: Option<&Caller>) -> bool {
    match (owner_id, caller) {
        (Some(owner), Some(caller)) => owner == caller.user_id,
        _ => false,
    }
}

fn error_response(e: &FlowError) -> HttpResponse {
    match e {
        FlowError::Workflow(WorkflowError::NotFound(_)) => HttpResponse::NotFound().json(error_body(e)),
        FlowError::Workflow(WorkflowError::Forbidden(_)) => HttpResponse::Forbidden().json(error_body(e)),
        FlowError::Workflow(_) => HttpResponse::UnprocessableEntity().json(error_body(e)),
        _ => {
            error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(error_body(e))
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "dagflow"
    }))
}

/// List workflows visible to the caller
#[get("/api/workflows")]
async fn list_workflows(req: HttpRequest, data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let caller = caller(&req);
    let workflows = match data.store.list_workflows().await {
        Ok(workflows) => workflows,
        Err(e) => return Ok(error_response(&e)),
    };
    let workflow_list: Vec<_> = workflows
        .iter()
        .filter(|w| workflow_visible(w, caller.as_ref()))
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "owner_id": w.owner_id,
                "is_public": w.is_public,
                "nodes": w.nodes.len(),
                "edges": w.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create or replace a workflow; it is always owned by the caller
#[post("/api/workflows")]
async fn create_workflow(
    req: HttpRequest,
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> ActixResult<impl Responder> {
    let caller = caller(&req);
    let mut workflow = workflow.into_inner();
    workflow.owner_id = caller.as_ref().map(|c| c.user_id.clone());
    let workflow_id = workflow.id;

    match data.store.load_workflow(workflow_id).await {
        Ok(existing) if !may_modify(existing.owner_id.as_deref(), caller.as_ref()) => {
            warn!("Refusing to replace workflow {} owned by {:?}", workflow_id, existing.owner_id);
            return Ok(error_response(&WorkflowError::Forbidden(workflow_id).into()));
        }
        Ok(_) | Err(FlowError::Workflow(WorkflowError::NotFound(_))) => {}
        Err(e) => return Ok(error_response(&e)),
    }

    info!("Creating workflow: {} ({})", workflow.name, workflow_id);

    if let Err(e) = data.store.save_workflow(workflow).await {
        return Ok(error_response(&e));
    }

    Ok(HttpResponse::Created().json(CreatedResponse {
        id: workflow_id.to_string(),
        message: "Workflow created successfully".to_string(),
    }))
}

async fn load_visible(
    req: &HttpRequest,
    data: &AppState,
    workflow_id: Uuid,
) -> Result<Workflow, FlowError> {
    let workflow = data.store.load_workflow(workflow_id).await?;
    if !workflow_visible(&workflow, caller(req).as_ref()) {
        return Err(WorkflowError::Forbidden(workflow_id).into());
    }
    Ok(workflow)
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match load_visible(&req, &data, path.into_inner()).await {
        Ok(workflow) => Ok(HttpResponse::Ok().json(workflow)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Delete a workflow; only its owner may do so
#[delete("/api/workflows/{id}")]
async fn delete_workflow(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let workflow = match data.store.load_workflow(workflow_id).await {
        Ok(workflow) => workflow,
        Err(e) => return Ok(error_response(&e)),
    };
    if !may_modify(workflow.owner_id.as_deref(), caller(&req).as_ref()) {
        return Ok(error_response(&WorkflowError::Forbidden(workflow_id).into()));
    }

    match data.store.delete_workflow(workflow_id).await {
        Ok(_) => {
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// Structural validation without execution
#[post("/api/workflows/{id}/validate")]
async fn validate_workflow(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow = match load_visible(&req, &data, path.into_inner()).await {
        Ok(workflow) => workflow,
        Err(e) => return Ok(error_response(&e)),
    };
    match data.runtime.validate(&workflow) {
        Ok(graph) => {
            let order: Vec<&str> = graph
                .order()
                .iter()
                .map(|idx| graph.model().node(*idx).id.as_str())
                .collect();
            Ok(HttpResponse::Ok().json(serde_json::json!({ "valid": true, "order": order })))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// Run a workflow and return its record
#[post("/api/workflows/{id}/run")]
async fn run_workflow(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let Some(caller) = caller(&req) else {
        return Ok(HttpResponse::Unauthorized().json(error_body(format!(
            "{} header is required to run workflows",
            USER_HEADER
        ))));
    };

    info!("Running workflow {} for {}", workflow_id, caller.user_id);

    match data
        .runtime
        .run_workflow_as(workflow_id, &caller, CancellationToken::new())
        .await
    {
        Ok(record) => {
            info!(
                "Workflow {} run {} finished: {:?}",
                workflow_id, record.run_id, record.status
            );
            Ok(HttpResponse::Ok().json(record))
        }
        Err(e) => {
            warn!("Workflow {} run rejected: {}", workflow_id, e);
            Ok(error_response(&e))
        }
    }
}

/// Fetch a finished run record of a workflow the caller can see
#[get("/api/runs/{id}")]
async fn get_run(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();
    let record = match data.runtime.load_run(run_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(error_body(format!("Run {} not found", run_id))))
        }
        Err(e) => return Ok(error_response(&e)),
    };
    match load_visible(&req, &data, record.workflow_id).await {
        Ok(_) => Ok(HttpResponse::Ok().json(record)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Node types visible to the caller
#[get("/api/node_types")]
async fn list_catalog(req: HttpRequest, data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let caller = caller(&req);
    match data.store.list_node_types(&visibility(caller.as_ref())).await {
        Ok(node_types) => Ok(HttpResponse::Ok().json(node_types)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Register a node type owned by the caller.
///
/// Ids already taken by the builtin catalog or another owner are a conflict.
#[post("/api/node_types")]
async fn create_node_type(
    req: HttpRequest,
    data: web::Data<AppState>,
    node_type: web::Json<NodeType>,
) -> ActixResult<impl Responder> {
    let caller = caller(&req);
    let mut node_type = node_type.into_inner();
    node_type.owner_id = caller.as_ref().map(|c| c.user_id.clone());

    match data.store.load_node_type(&node_type.id).await {
        Ok(Some(existing)) if !may_modify(existing.owner_id.as_deref(), caller.as_ref()) => {
            warn!("Refusing to replace node type {} owned by {:?}", existing.id, existing.owner_id);
            return Ok(HttpResponse::Conflict()
                .json(error_body(format!("Node type {} belongs to another owner", existing.id))));
        }
        Ok(_) => {}
        Err(e) => return Ok(error_response(&e)),
    }
    if node_type.runtime == CodeRuntime::Builtin && !data.runtime.builtins().contains(&node_type.code) {
        return Ok(HttpResponse::UnprocessableEntity()
            .json(error_body(format!("Unknown builtin node: {}", node_type.code))));
    }
    let id = node_type.id.clone();

    info!("Registering node type: {} ({:?})", id, node_type.runtime);

    match data.store.save_node_type(node_type).await {
        Ok(()) => Ok(HttpResponse::Created().json(CreatedResponse {
            id,
            message: "Node type created successfully".to_string(),
        })),
        Err(e) => Ok(error_response(&e)),
    }
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    // Subscribe to events
    let mut events = data.runtime.subscribe_events();

    // Spawn task to handle WebSocket
    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                // Receive event from runtime
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            // Serialize and send event
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("WebSocket client lagged, {} events dropped", missed);
                        }
                        Err(_) => break,
                    }
                }

                // Handle incoming WebSocket messages (ping/pong)
                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available builtin node code
#[get("/api/nodes")]
async fn list_builtins(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.builtins();
    let node_types = registry.list_node_types();

    let nodes: Vec<_> = node_types
        .iter()
        .map(|node_type| {
            let metadata = registry.get_metadata(node_type);
            serde_json::json!({
                "type": node_type,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(delete_workflow)
        .service(validate_workflow)
        .service(run_workflow)
        .service(get_run)
        .service(list_catalog)
        .service(create_node_type)
        .service(websocket_events)
        .service(list_builtins);
}

fn env_parse<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

fn engine_config() -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::default();
    if let Some(workers) = env_parse::<usize>("DAGFLOW_WORKERS")? {
        config.max_workers = workers;
    }
    if let Some(ms) = env_parse::<u64>("DAGFLOW_TIMEOUT_MS")? {
        config.limits.timeout = Duration::from_millis(ms);
    }
    if let Some(mb) = env_parse::<u64>("DAGFLOW_MEMORY_MB")? {
        config.limits.max_memory_bytes = Some(mb * 1024 * 1024);
    }
    Ok(config)
}

/// Builtin catalog in memory; runs go to DAGFLOW_RECORD_DIR when set
fn build_state(config: EngineConfig) -> anyhow::Result<AppState> {
    let registry = dagnodes::standard_registry();
    let store = Arc::new(MemoryStore::with_contents(
        [],
        dagnodes::standard_node_types(&registry),
    ));
    let run_store: Arc<dyn RunStore> = match std::env::var("DAGFLOW_RECORD_DIR") {
        Ok(dir) => {
            info!("Persisting run records to {}", dir);
            Arc::new(FileRunStore::new(dir))
        }
        Err(_) => store.clone(),
    };
    let runtime = FlowRuntime::with_stores(store.clone(), store.clone(), registry, config)?
        .with_run_store(run_store);

    Ok(AppState {
        runtime: Arc::new(runtime),
        store,
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting dagflow server");

    let app_state = web::Data::new(build_state(engine_config()?)?);

    info!("✅ Runtime initialized with standard nodes");

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    // Start HTTP server
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
