use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};

use super::app_state::AppState;
use super::{rest_api, ws_handler};

fn cors_layer(public_url: &str) -> CorsLayer {
    // Any origin for local development, otherwise only the public URL.
    if public_url.contains("localhost") || public_url.contains("127.0.0.1") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = public_url
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("https://localhost"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/health", get(rest_api::health))
        // Users
        .route("/api/me", get(rest_api::get_me).patch(rest_api::update_me))
        .route("/api/users/{id}", get(rest_api::get_user))
        // Servers
        .route(
            "/api/servers",
            get(rest_api::list_servers).post(rest_api::create_server),
        )
        .route(
            "/api/servers/{id}",
            get(rest_api::get_server)
                .patch(rest_api::update_server)
                .delete(rest_api::delete_server),
        )
        .route(
            "/api/servers/{id}/transfer",
            post(rest_api::transfer_ownership),
        )
        .route("/api/servers/{id}/leave", post(rest_api::leave_server))
        // Members
        .route("/api/servers/{id}/members", get(rest_api::list_members))
        .route(
            "/api/servers/{id}/members/{user_id}",
            axum::routing::delete(rest_api::kick_member),
        )
        .route(
            "/api/servers/{id}/members/{user_id}/roles",
            put(rest_api::update_member_roles),
        )
        // Channels
        .route(
            "/api/servers/{id}/channels",
            get(rest_api::list_channels).post(rest_api::create_channel),
        )
        .route(
            "/api/channels/{id}",
            get(rest_api::get_channel)
                .patch(rest_api::update_channel)
                .delete(rest_api::delete_channel),
        )
        // Messages
        .route(
            "/api/channels/{id}/messages",
            get(rest_api::message_history).post(rest_api::post_message),
        )
        .route(
            "/api/messages/{id}",
            get(rest_api::get_message)
                .patch(rest_api::edit_message)
                .delete(rest_api::delete_message),
        )
        // Invites (preview is public)
        .route(
            "/api/servers/{id}/invites",
            get(rest_api::list_invites).post(rest_api::create_invite),
        )
        .route(
            "/api/invites/{code}",
            get(rest_api::preview_invite)
                .post(rest_api::redeem_invite)
                .delete(rest_api::revoke_invite),
        )
        // Bots (profile is public)
        .route("/api/bots", get(rest_api::list_bots).post(rest_api::create_bot))
        .route(
            "/api/bots/{id}",
            get(rest_api::get_bot)
                .patch(rest_api::update_bot)
                .delete(rest_api::delete_bot),
        )
        .route("/api/bots/{id}/profile", get(rest_api::bot_profile))
        .layer(DefaultBodyLimit::max(state.max_body_bytes));

    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .merge(api_routes)
        .layer(cors_layer(&state.public_url))
        .with_state(state)
}
