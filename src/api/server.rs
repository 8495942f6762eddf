//! axum router and handlers for the task endpoints.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch},
};
use axum_extra::extract::Query;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::db::Database;
use crate::error::{PlannerError, PlannerResult};
use crate::time::local_now;
use crate::types::{NewTask, TaskFilters, TaskId, TaskTree, TaskUpdate};

/// Server state shared across handlers.
#[derive(Clone)]
pub struct ApiServer {
    db: Arc<Database>,
}

impl ApiServer {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Get the database reference.
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }
}

impl IntoResponse for PlannerError {
    fn into_response(self) -> Response {
        let status = match self {
            PlannerError::Validation { .. } => StatusCode::BAD_REQUEST,
            PlannerError::NotFound(_) => StatusCode::NOT_FOUND,
            PlannerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.is_client_error() {
            warn!(code = ?self.code(), error = %self, "Request rejected");
        } else {
            error!(error = %self, "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

/// Health check response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_task(
    State(state): State<ApiServer>,
    Json(input): Json<NewTask>,
) -> PlannerResult<Json<TaskTree>> {
    state.db().create_task(input).map(Json)
}

/// Root tasks with descendants, sorted by scheduled date. Multi-valued filters
/// are read from repeated keys.
async fn list_tasks(
    State(state): State<ApiServer>,
    Query(filters): Query<TaskFilters>,
) -> PlannerResult<Json<Vec<TaskTree>>> {
    state.db().list_root_tasks(&filters, local_now()).map(Json)
}

async fn get_task(
    State(state): State<ApiServer>,
    Path(task_id): Path<TaskId>,
) -> PlannerResult<Json<TaskTree>> {
    state.db().get_task_tree(task_id).map(Json)
}

async fn update_task(
    State(state): State<ApiServer>,
    Path(task_id): Path<TaskId>,
    Json(update): Json<TaskUpdate>,
) -> PlannerResult<Json<TaskTree>> {
    state.db().update_task(task_id, &update).map(Json)
}

async fn mark_done(
    State(state): State<ApiServer>,
    Path(task_id): Path<TaskId>,
) -> PlannerResult<Json<TaskTree>> {
    state.db().mark_task_done(task_id, local_now()).map(Json)
}

async fn mark_undone(
    State(state): State<ApiServer>,
    Path(task_id): Path<TaskId>,
) -> PlannerResult<Json<TaskTree>> {
    state.db().mark_task_undone(task_id).map(Json)
}

async fn delete_task(
    State(state): State<ApiServer>,
    Path(task_id): Path<TaskId>,
) -> PlannerResult<Json<serde_json::Value>> {
    let deleted = state.db().delete_task(task_id)?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

/// Normalize a configured base path to `/segment[/segment]` or `None` for root.
fn normalize_base_path(base_path: &str) -> Option<String> {
    let trimmed = base_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{}", trimmed))
    }
}

/// Build the router with all routes.
pub fn build_router(state: ApiServer, config: &ServerConfig) -> Router {
    let routes = Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/", get(list_tasks).post(create_task))
        .route(
            "/tasks/{task_id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/tasks/{task_id}/done", patch(mark_done))
        .route("/tasks/{task_id}/undone", patch(mark_undone))
        .route("/health", get(health));

    let app = match normalize_base_path(&config.base_path) {
        Some(base) => Router::new().nest(&base, routes),
        None => routes,
    };

    app.layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle for a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal graceful shutdown and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!("Server task ended abnormally: {}", e);
        }
    }
}

/// Bind and start serving in the background.
pub async fn start_server(db: Arc<Database>, config: &ServerConfig) -> anyhow::Result<ServerHandle> {
    let app = build_router(ApiServer::new(db), config);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Planner API listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("Planner API shutting down");
            })
            .await
        {
            error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn make_app(config: &ServerConfig) -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        build_router(ApiServer::new(db), config)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[test]
    fn base_path_normalization() {
        assert_eq!(normalize_base_path(""), None);
        assert_eq!(normalize_base_path("/"), None);
        assert_eq!(normalize_base_path("timely/api/"), Some("/timely/api".to_string()));
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_app(&ServerConfig::default());
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn create_forces_todo_and_returns_empty_children() {
        let app = make_app(&ServerConfig::default());
        let (status, body) = send(
            &app,
            "POST",
            "/tasks/",
            Some(json!({
                "title": "Water plants",
                "task_type": "chore",
                "recurrence_interval_days": 3,
                "status": "done"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "todo");
        assert_eq!(body["children"], json!([]));
        assert!(body["id"].is_i64());
        assert!(body["created_at"].is_string());
    }

    #[tokio::test]
    async fn root_deadline_without_deadline_is_bad_request() {
        let app = make_app(&ServerConfig::default());
        let (status, body) = send(
            &app,
            "POST",
            "/tasks",
            Some(json!({ "title": "Thesis", "task_type": "deadline" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["field"], "deadline");
    }

    #[tokio::test]
    async fn missing_task_is_not_found_on_every_route() {
        let app = make_app(&ServerConfig::default());
        for (method, uri, body) in [
            ("GET", "/tasks/99", None),
            ("PATCH", "/tasks/99", Some(json!({ "title": "x" }))),
            ("PATCH", "/tasks/99/done", None),
            ("PATCH", "/tasks/99/undone", None),
            ("DELETE", "/tasks/99", None),
        ] {
            let (status, body) = send(&app, method, uri, body).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
            assert_eq!(body["code"], "TASK_NOT_FOUND");
        }
    }

    #[tokio::test]
    async fn done_then_undone_roundtrip_for_streak() {
        let app = make_app(&ServerConfig::default());
        let (_, created) = send(
            &app,
            "POST",
            "/tasks/",
            Some(json!({ "title": "Run", "task_type": "streak" })),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let (status, done) = send(&app, "PATCH", &format!("/tasks/{}/done", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["status"], "done");
        assert_eq!(done["current_streak"], 1);
        assert_eq!(done["best_streak"], 1);

        let (status, undone) = send(&app, "PATCH", &format!("/tasks/{}/undone", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(undone["status"], "todo");
        assert_eq!(undone["current_streak"], 1);
        assert_eq!(undone["last_completed_at"], done["last_completed_at"]);
    }

    #[tokio::test]
    async fn patch_applies_only_present_fields() {
        let app = make_app(&ServerConfig::default());
        let (_, created) = send(
            &app,
            "POST",
            "/tasks/",
            Some(json!({
                "title": "Laundry",
                "task_type": "chore",
                "effort": "M",
                "scheduled_date": "2024-01-02T09:00"
            })),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let (status, updated) = send(
            &app,
            "PATCH",
            &format!("/tasks/{}", id),
            Some(json!({ "description": "x" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["description"], "x");
        assert_eq!(updated["title"], "Laundry");
        assert_eq!(updated["effort"], "M");
        assert_eq!(updated["scheduled_date"], created["scheduled_date"]);
    }

    #[tokio::test]
    async fn list_returns_roots_with_children() {
        let app = make_app(&ServerConfig::default());
        let (_, parent) = send(
            &app,
            "POST",
            "/tasks/",
            Some(json!({ "title": "Thesis", "task_type": "deadline", "deadline": "2030-05-01" })),
        )
        .await;
        let parent_id = parent["id"].as_i64().unwrap();
        send(
            &app,
            "POST",
            "/tasks/",
            Some(json!({ "title": "Chapter 1", "task_type": "deadline", "parent_id": parent_id })),
        )
        .await;

        let (status, list) = send(&app, "GET", "/tasks/?task_type=deadline", None).await;
        assert_eq!(status, StatusCode::OK);
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["children"][0]["title"], "Chapter 1");

        let (_, today) = send(&app, "GET", "/tasks?only_today=true", None).await;
        assert_eq!(today, json!([]));
    }

    #[tokio::test]
    async fn list_reads_repeated_keys_flags_and_date_range() {
        let app = make_app(&ServerConfig::default());
        let mut ids = Vec::new();
        for (title, task_type, scheduled) in [
            ("Run", "streak", "2024-05-02T07:00"),
            ("Dishes", "chore", "2024-05-20T19:00"),
            ("Taxes", "deadline", "2024-06-10T09:00"),
        ] {
            let (status, created) = send(
                &app,
                "POST",
                "/tasks/",
                Some(json!({
                    "title": title,
                    "task_type": task_type,
                    "scheduled_date": scheduled,
                    "deadline": "2030-01-01",
                    "effort": "S"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            ids.push(created["id"].as_i64().unwrap());
        }
        send(&app, "PATCH", &format!("/tasks/{}/done", ids[0]), None).await;

        let listed = |body: Value| -> Vec<i64> {
            body.as_array()
                .unwrap()
                .iter()
                .map(|t| t["id"].as_i64().unwrap())
                .collect()
        };

        let (status, both) = send(&app, "GET", "/tasks/?status=todo&status=done", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed(both), ids);

        let (_, types) = send(&app, "GET", "/tasks/?task_type=chore&task_type=deadline&effort=S", None).await;
        assert_eq!(listed(types), vec![ids[1], ids[2]]);

        let (_, range) = send(
            &app,
            "GET",
            "/tasks/?start_date=2024-05-01&end_date=2024-05-31&parent_id=null",
            None,
        )
        .await;
        assert_eq!(listed(range), vec![ids[0], ids[1]]);

        let (status, today) = send(&app, "GET", "/tasks/?only_today=1&has_deadline=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed(today), ids);

        let (status, _) = send(&app, "GET", "/tasks/?status=later", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_acknowledges_and_cascades() {
        let app = make_app(&ServerConfig::default());
        let (_, parent) = send(
            &app,
            "POST",
            "/tasks/",
            Some(json!({ "title": "Move house", "task_type": "chore" })),
        )
        .await;
        let parent_id = parent["id"].as_i64().unwrap();
        let (_, child) = send(
            &app,
            "POST",
            "/tasks/",
            Some(json!({ "title": "Pack books", "task_type": "chore", "parent_id": parent_id })),
        )
        .await;
        let child_id = child["id"].as_i64().unwrap();

        let (status, ack) = send(&app, "DELETE", &format!("/tasks/{}", parent_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["ok"], true);
        assert_eq!(ack["deleted"], 2);

        let (status, _) = send(&app, "GET", &format!("/tasks/{}", child_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn routes_are_nested_under_base_path() {
        let config = ServerConfig {
            base_path: "/timely/api".to_string(),
            ..ServerConfig::default()
        };
        let app = make_app(&config);

        let (status, _) = send(&app, "GET", "/timely/api/tasks/", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/tasks/", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
