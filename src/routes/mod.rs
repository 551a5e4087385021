//! HTTP route table.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::messaging::{conversation_guard, handlers};
use crate::realtime::gateway::ws_handler;
use crate::server::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Routes under /conversations/{id} run through the participant guard.
    let conversation_scoped = Router::new()
        .route(
            "/conversations/{id}",
            get(handlers::get_conversation)
                .patch(handlers::update_conversation)
                .delete(handlers::delete_conversation),
        )
        .route(
            "/conversations/{id}/archive",
            post(handlers::archive_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route(
            "/conversations/{id}/read",
            post(handlers::mark_conversation_read),
        )
        .route(
            "/conversations/{id}/mute",
            post(handlers::mute_conversation).delete(handlers::unmute_conversation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            conversation_guard,
        ));

    let api = Router::new()
        .route(
            "/conversations",
            post(handlers::create_conversation).get(handlers::list_conversations),
        )
        .merge(conversation_scoped)
        .route("/messages/{id}/read", post(handlers::mark_message_read))
        .route("/messages/{id}", delete(handlers::delete_message))
        .route("/unread-count", get(handlers::unread_count))
        .route(
            "/preferences",
            get(handlers::get_preferences).patch(handlers::update_preferences),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
