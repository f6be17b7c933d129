//! Route handlers.
//!
//! Each handler decodes its JSON body, calls into storage or the executor,
//! and maps errors onto status codes: validation 400, missing 404,
//! everything else 500. Stack listings and documents answer as YAML, state
//! export as JSON.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error, info};

use gantry_core::{CoreError, Layer, RunRequest, Stack, Variables};
use gantry_engine::EngineError;
use gantry_state::{export_state, import_state, DeployState, StateError, UserRole};

use crate::requests::*;
use crate::ApiState;

/// Handler-level error carrying its response status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        match &err {
            StateError::StackMissing | StateError::StackStateMissing => {
                ApiError::not_found(err.to_string())
            }
            StateError::StackExists
            | StateError::ParentMissing(_)
            | StateError::ParentCycle(_)
            | StateError::DependantStacks { .. }
            | StateError::OrphanStack(_)
            | StateError::UserExists(_)
            | StateError::UserMissing(_)
            | StateError::Document(_)
            | StateError::Model(_) => ApiError::bad_request(err.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::Model(_) | EngineError::SkipPattern(_) => {
                ApiError::bad_request(err.to_string())
            }
            EngineError::State(state_err) if matches!(state_err, StateError::StackMissing) => {
                ApiError::not_found(err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Health ─────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ── Stacks ─────────────────────────────────────────────────────

pub async fn list(State(state): State<ApiState>) -> ApiResult<String> {
    debug!("received list command");
    let mut names: Vec<String> = state
        .stacks
        .get_all()?
        .into_iter()
        .map(|s| s.name)
        .collect();
    names.sort();

    serde_yaml::to_string(&names).map_err(|e| ApiError::internal(e.to_string()))
}

pub async fn get_stack(
    State(state): State<ApiState>,
    Json(request): Json<GetStackRequest>,
) -> ApiResult<String> {
    if request.name.is_empty() {
        return Err(ApiError::bad_request("Stack name required"));
    }

    let stack = state.stacks.get_stack(&request.name)?;
    stack
        .to_yaml()
        .map_err(|e| ApiError::internal(e.to_string()))
}

pub async fn create_stack(
    State(state): State<ApiState>,
    Json(request): Json<CreateStackRequest>,
) -> ApiResult<StatusCode> {
    let stack = Stack::from_yaml(&request.stackfile)?;
    debug!(stack = %stack.name, "creating stack");
    state.stacks.store_stack(&stack)?;
    Ok(StatusCode::OK)
}

pub async fn create_layer(
    State(state): State<ApiState>,
    Json(request): Json<CreateLayerRequest>,
) -> ApiResult<StatusCode> {
    let mut stack = Stack::from_yaml(&request.stackfile)?;
    stack.layer = Layer::from_name(&request.layer)?;
    stack.from = request.parent;
    state.stacks.store_stack(&stack)?;
    Ok(StatusCode::OK)
}

pub async fn remove_stack(
    State(state): State<ApiState>,
    Json(request): Json<RemoveStackRequest>,
) -> ApiResult<StatusCode> {
    if request.name.is_empty() {
        return Err(ApiError::bad_request("Stack name required"));
    }

    state.stacks.remove_stack(&request.name, request.force)?;
    Ok(StatusCode::OK)
}

// ── Runs ───────────────────────────────────────────────────────

/// Resolve, layer-merge and execute one run request. Used by `/run` and by
/// state import.
async fn run_stack(
    state: &ApiState,
    request: &RunRequest,
    vars: Arc<Variables>,
) -> ApiResult<()> {
    let stack = state.stacks.get_stack(&request.name)?;

    let merged = if request.zone.is_empty() {
        stack
    } else {
        let mut layers = state.stacks.get_layer_chain(&request.zone)?;
        layers.merge(&stack);
        layers
    };

    info!(stack = %request.name, zone = %request.zone, "running stack");
    state.executor.run(&merged, request, vars).await?;
    Ok(())
}

pub async fn run(
    State(state): State<ApiState>,
    Json(request): Json<RunRequest>,
) -> ApiResult<StatusCode> {
    if request.name.is_empty() {
        return Err(ApiError::bad_request("Stack name required"));
    }

    // Placement decisions need a current cluster view.
    if let Err(e) = state.scheduler.cluster().refresh().await {
        error!(error = %e, "cluster state refresh failed");
        return Err(ApiError::not_found(e.to_string()));
    }

    let vars = Variables::new();
    for (key, value) in state.globals.iter() {
        vars.set_global(key.clone(), value.clone());
    }
    for (key, value) in &request.variables {
        vars.set_arbitrary(key.clone(), value.clone());
    }

    run_stack(&state, &request, Arc::new(vars)).await?;
    Ok(StatusCode::OK)
}

// ── Users ──────────────────────────────────────────────────────

pub async fn create_user(
    State(state): State<ApiState>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, String)> {
    debug!(user = %request.name, role = %request.role, "creating user");
    let key = state
        .users
        .create_user(&request.name, UserRole::from_name(&request.role))?;
    Ok((StatusCode::CREATED, key))
}

pub async fn refresh_token(
    State(state): State<ApiState>,
    Json(request): Json<RefreshTokenRequest>,
) -> ApiResult<String> {
    Ok(state.users.refresh_token(&request.name)?)
}

// ── Schedules ──────────────────────────────────────────────────

pub async fn scheduled(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.scheduler.scheduled_tasks())
}

pub async fn delete_scheduled(
    State(state): State<ApiState>,
    Json(request): Json<RemoveScheduledRequest>,
) -> ApiResult<String> {
    if state.scheduler.remove_scheduled(request.id) {
        Ok(format!("Removed scheduled task {}\n", request.id))
    } else {
        Err(ApiError::not_found(format!(
            "no scheduled task {}",
            request.id
        )))
    }
}

// ── State export / import ──────────────────────────────────────

pub async fn get_state(State(state): State<ApiState>) -> ApiResult<Json<DeployState>> {
    Ok(Json(export_state(
        state.stacks.as_ref(),
        state.state.as_ref(),
    )?))
}

pub async fn import_deploy_state(
    State(state): State<ApiState>,
    body: String,
) -> ApiResult<StatusCode> {
    // The body is the exported state document, possibly wrapped as a JSON
    // string by older clients.
    let deploy: DeployState = serde_json::from_str(&body)
        .or_else(|_| {
            serde_json::from_str::<String>(&body)
                .and_then(|inner| serde_json::from_str(&inner))
        })
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let running = import_state(&deploy, state.stacks.as_ref())?;

    for stack_state in running {
        let request = RunRequest::new(stack_state.name.clone(), stack_state.zone.clone());

        // Replay uses global variables only.
        let vars = Variables::new();
        for (key, value) in state.globals.iter() {
            vars.set_global(key.clone(), value.clone());
        }

        info!(stack = %request.name, zone = %request.zone, "re-running imported stack");
        run_stack(&state, &request, Arc::new(vars)).await?;
    }

    Ok(StatusCode::OK)
}
