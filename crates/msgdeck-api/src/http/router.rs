//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/` and require an API key, except
//! `/health`. Platform-scoped routes take the platform (`telegram` or
//! `whatsapp`) as their first path segment.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Authentication
        .route("/{platform}/auth/start", post(handlers::auth::start_auth))
        .route("/{platform}/auth/verify-code", post(handlers::auth::verify_code))
        .route(
            "/{platform}/auth/verify-password",
            post(handlers::auth::verify_password),
        )
        // Session status and teardown
        .route(
            "/{platform}/account/status/{phone_number}",
            get(handlers::session::get_status),
        )
        .route(
            "/{platform}/account/disconnect/{phone_number}",
            post(handlers::session::disconnect),
        )
        .route("/{platform}/accounts/active", get(handlers::session::list_active))
        // Messaging
        .route("/{platform}/message/send", post(handlers::message::send_message))
        .route(
            "/{platform}/chats/{phone_number}",
            get(handlers::message::list_chats),
        )
        // Account management
        .route(
            "/accounts",
            get(handlers::account::list_accounts).post(handlers::account::create_account),
        )
        .route(
            "/accounts/{id}",
            get(handlers::account::get_account)
                .put(handlers::account::update_account)
                .delete(handlers::account::delete_account),
        )
        // Lifecycle events
        .route("/ws/events", get(handlers::ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
