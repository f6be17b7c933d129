//! gantry-api — REST surface for the stack deployment service.
//!
//! # Routes
//!
//! | Route | Body | Response |
//! |---|---|---|
//! | GET `/health` | — | 200 |
//! | POST `/list` | — | YAML list of stack names, sorted |
//! | POST `/get` | `{name}` | YAML stack |
//! | POST `/run` | `{name, zone, maxwait, variables, skip}` | empty |
//! | POST `/createstack` | `{stackfile}` | empty |
//! | POST `/createlayer` | `{stackfile, layer, parent}` | empty |
//! | POST `/removestack` | `{name, force}` | empty |
//! | POST `/createuser` (admin) | `{name, role}` | new key text, 201 |
//! | POST `/refreshtoken` (admin) | `{name}` | new key text |
//! | GET `/scheduled` | — | JSON schedule list |
//! | POST `/scheduled/delete` | `{id}` | text |
//! | GET `/state` | — | JSON deploy state |
//! | POST `/importstate` | exported state document | empty |
//!
//! Auth headers `X-Api-User` / `X-Api-Key` are required everywhere but
//! `/health`; `/createuser` and `/refreshtoken` additionally require the
//! admin role.

pub mod auth;
pub mod handlers;
pub mod requests;

use std::collections::HashMap;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use gantry_engine::StackExecutor;
use gantry_scheduler::Scheduler;
use gantry_state::{StackStorage, StateStorage, UserStorage};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub stacks: Arc<dyn StackStorage>,
    pub state: Arc<dyn StateStorage>,
    pub users: Arc<dyn UserStorage>,
    pub executor: Arc<StackExecutor>,
    pub scheduler: Arc<Scheduler>,
    /// Service-wide variables seeded into every run context.
    pub globals: Arc<HashMap<String, String>>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let admin_routes = Router::new()
        .route("/createuser", post(handlers::create_user))
        .route("/refreshtoken", post(handlers::refresh_token))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    let authed_routes = Router::new()
        .route("/list", post(handlers::list))
        .route("/get", post(handlers::get_stack))
        .route("/run", post(handlers::run))
        .route("/createstack", post(handlers::create_stack))
        .route("/createlayer", post(handlers::create_layer))
        .route("/removestack", post(handlers::remove_stack))
        .route("/scheduled", get(handlers::scheduled))
        .route("/scheduled/delete", post(handlers::delete_scheduled))
        .route("/state", get(handlers::get_state))
        .route("/importstate", post(handlers::import_deploy_state))
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(authed_routes)
        .with_state(state)
}
