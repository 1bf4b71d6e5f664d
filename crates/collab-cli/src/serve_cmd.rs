use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};
use uuid::Uuid;

use collab_core::ProjectError;
use collab_core::plan::CompletionClient;
use collab_core::project::{self, CreateProjectRequest, CreateTaskRequest, TaskEdit};
use collab_core::team::{self, JoinAction, JoinDecision};
use collab_core::token::{TokenConfig, UserClaims, bearer_token, validate_token};
use collab_core::user;
use collab_db::queries::users;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub tokens: TokenConfig,
    pub planner: Arc<dyn CompletionClient>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        error!("request failed: {err:#}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

impl From<ProjectError> for AppError {
    fn from(err: ProjectError) -> Self {
        let status = match &err {
            ProjectError::Validation(_) => StatusCode::BAD_REQUEST,
            ProjectError::GenerationRequest(_) | ProjectError::PlanFormat(_) => {
                warn!("plan generation failed: {err}");
                StatusCode::BAD_GATEWAY
            }
            ProjectError::Authorization(_) => StatusCode::FORBIDDEN,
            ProjectError::NotFound(_) => StatusCode::NOT_FOUND,
            ProjectError::Internal(_) => {
                error!("request failed: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, format!("{err:#}"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found(format!("{what} {raw} not found")))
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/projects/ai", post(create_project_ai))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{id}", get(get_project).delete(delete_project))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task).put(update_task))
        .route("/teams", get(list_teams).post(create_team))
        .route("/teams/{id}", delete(delete_team))
        .route("/teams/{id}/join", post(request_join).put(respond_to_join))
        .route("/users", get(list_users))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("collab serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("collab serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Reject requests without a valid bearer token for an existing user, and
/// make the caller's [`UserClaims`] available to handlers.
async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = {
        let token = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| AppError::unauthorized("No token, authorization denied"))?;

        validate_token(&state.tokens, token).map_err(|e| {
            debug!("rejected bearer token: {e}");
            AppError::unauthorized("Token is not valid")
        })?
    };

    users::get_user(&state.pool, claims.user_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::unauthorized("Token is not valid"))?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_project(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    body: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body?;
    let detail = project::create_project(&state.pool, user.user_id, &body).await?;
    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

async fn create_project_ai(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    body: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body?;
    let detail =
        project::create_project_with_ai(&state.pool, state.planner.as_ref(), user.user_id, &body)
            .await?;
    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

async fn list_projects(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
) -> Result<Response, AppError> {
    let projects = project::list_projects(&state.pool, user.user_id).await?;
    Ok(Json(projects).into_response())
}

async fn get_project(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "project")?;
    let detail = project::get_project_detail(&state.pool, user.user_id, id).await?;
    Ok(Json(detail).into_response())
}

async fn delete_project(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "project")?;
    project::delete_project(&state.pool, user.user_id, id).await?;
    Ok(message("Project removed").into_response())
}

async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
) -> Result<Response, AppError> {
    let tasks = project::list_tasks(&state.pool, user.user_id).await?;
    Ok(Json(tasks).into_response())
}

async fn create_task(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body?;
    let task = project::create_task(&state.pool, user.user_id, &body).await?;
    Ok((StatusCode::CREATED, Json(task)).into_response())
}

async fn get_task(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "task")?;
    let task = project::get_task_detail(&state.pool, user.user_id, id).await?;
    Ok(Json(task).into_response())
}

async fn update_task(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    Path(id): Path<String>,
    body: Result<Json<TaskEdit>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "task")?;
    let Json(edit) = body?;
    let task = project::update_task(&state.pool, user.user_id, id, &edit).await?;
    Ok(Json(task).into_response())
}

async fn list_teams(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
) -> Result<Response, AppError> {
    let teams = team::list_teams(&state.pool, user.user_id).await?;
    Ok(Json(teams).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateTeamRequest {
    #[serde(default)]
    name: String,
}

async fn create_team(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    body: Result<Json<CreateTeamRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body?;
    let team = team::create_team(&state.pool, user.user_id, &body.name).await?;
    Ok((StatusCode::CREATED, Json(team)).into_response())
}

async fn delete_team(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "team")?;
    team::delete_team(&state.pool, user.user_id, id).await?;
    Ok(message("Team removed").into_response())
}

async fn request_join(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "team")?;
    team::request_join(&state.pool, user.user_id, id).await?;
    Ok(message("Join request sent successfully").into_response())
}

async fn respond_to_join(
    State(state): State<AppState>,
    Extension(user): Extension<UserClaims>,
    Path(id): Path<String>,
    body: Result<Json<JoinDecision>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "team")?;
    let Json(decision) = body?;
    team::respond_to_join(&state.pool, user.user_id, id, &decision).await?;
    let text = match decision.action {
        JoinAction::Approve => "Join request approved",
        JoinAction::Reject => "Join request rejected",
    };
    Ok(message(text).into_response())
}

async fn list_users(State(state): State<AppState>) -> Result<Response, AppError> {
    let users = user::list_users(&state.pool).await?;
    Ok(Json(users).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
