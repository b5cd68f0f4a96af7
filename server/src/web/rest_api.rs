use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::db::models::{BotRow, ChannelRow, InviteRow, MemberRow, MessageRow, ServerRow, UserRow};
use crate::engine::bots::{BotPatch, BotProfile, CreatedBot};
use crate::engine::channels::ChannelPatch;
use crate::engine::error::EngineError;
use crate::engine::invites::InvitePreview;
use crate::engine::messages::MessageHistory;
use crate::engine::servers::ServerPatch;
use crate::engine::users::UserPatch;

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

type ApiResult<T> = Result<Json<T>, EngineError>;
type Created<T> = Result<(StatusCode, Json<T>), EngineError>;

// Extractors whose rejections render as `ErrorBody` like every other failure.
type ApiJson<T> = WithRejection<Json<T>, EngineError>;
type ApiPath<T> = WithRejection<Path<T>, EngineError>;
type ApiQuery<T> = WithRejection<Query<T>, EngineError>;

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
        EngineError::Internal(_) | EngineError::TokenSigning(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let message = if self.is_internal() {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            message,
            field: self.field().map(str::to_string),
        };
        (status_for(&self), Json(body)).into_response()
    }
}

impl From<JsonRejection> for EngineError {
    fn from(rejection: JsonRejection) -> Self {
        EngineError::invalid("body", rejection.body_text())
    }
}

impl From<QueryRejection> for EngineError {
    fn from(rejection: QueryRejection) -> Self {
        EngineError::invalid("query", rejection.body_text())
    }
}

impl From<PathRejection> for EngineError {
    fn from(rejection: PathRejection) -> Self {
        EngineError::invalid("path", rejection.body_text())
    }
}

fn created<T>(value: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(value)))
}

// ── Health ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.engine.registry().session_count(),
    })
}

// ── Users ───────────────────────────────────────────────

/// GET /api/me
pub async fn get_me(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<UserRow> {
    Ok(Json(state.engine.get_user(&auth.user_id).await?))
}

/// PATCH /api/me: display name and presence.
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Json(patch), _): ApiJson<UserPatch>,
) -> ApiResult<UserRow> {
    Ok(Json(state.engine.update_user(&auth.user_id, patch).await?))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    WithRejection(Path(user_id), _): ApiPath<String>,
) -> ApiResult<UserRow> {
    Ok(Json(state.engine.get_user(&user_id).await?))
}

// ── Servers ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub user_id: String,
}

/// GET /api/servers: the caller's servers.
pub async fn list_servers(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<Vec<ServerRow>> {
    Ok(Json(state.engine.list_servers_for_user(&auth.user_id).await?))
}

/// POST /api/servers
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Json(body), _): ApiJson<CreateServerRequest>,
) -> Created<ServerRow> {
    let server = state
        .engine
        .create_server(&auth.user_id, &body.name, body.description.as_deref())
        .await?;
    created(server)
}

/// GET /api/servers/:id
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
) -> ApiResult<ServerRow> {
    Ok(Json(state.engine.get_server(&auth.user_id, &server_id).await?))
}

/// PATCH /api/servers/:id (owner only)
pub async fn update_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
    WithRejection(Json(patch), _): ApiJson<ServerPatch>,
) -> ApiResult<ServerRow> {
    Ok(Json(
        state
            .engine
            .update_server(&auth.user_id, &server_id, patch)
            .await?,
    ))
}

/// DELETE /api/servers/:id (owner only)
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
) -> Result<StatusCode, EngineError> {
    state.engine.delete_server(&auth.user_id, &server_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/servers/:id/transfer
pub async fn transfer_ownership(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
    WithRejection(Json(body), _): ApiJson<TransferRequest>,
) -> ApiResult<ServerRow> {
    Ok(Json(
        state
            .engine
            .transfer_ownership(&auth.user_id, &server_id, &body.user_id)
            .await?,
    ))
}

// ── Members ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RolesRequest {
    pub roles: Vec<String>,
}

/// GET /api/servers/:id/members
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
) -> ApiResult<Vec<MemberRow>> {
    Ok(Json(state.engine.list_members(&auth.user_id, &server_id).await?))
}

/// PUT /api/servers/:id/members/:user_id/roles (owner only)
pub async fn update_member_roles(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path((server_id, user_id)), _): ApiPath<(String, String)>,
    WithRejection(Json(body), _): ApiJson<RolesRequest>,
) -> ApiResult<MemberRow> {
    Ok(Json(
        state
            .engine
            .update_member_roles(&auth.user_id, &server_id, &user_id, &body.roles)
            .await?,
    ))
}

/// DELETE /api/servers/:id/members/:user_id: kick.
pub async fn kick_member(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path((server_id, user_id)), _): ApiPath<(String, String)>,
) -> Result<StatusCode, EngineError> {
    state
        .engine
        .kick_member(&auth.user_id, &server_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/servers/:id/leave
pub async fn leave_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
) -> Result<StatusCode, EngineError> {
    state.engine.leave_server(&auth.user_id, &server_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Channels ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub description: Option<String>,
}

/// GET /api/servers/:id/channels
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
) -> ApiResult<Vec<ChannelRow>> {
    Ok(Json(state.engine.list_channels(&auth.user_id, &server_id).await?))
}

/// POST /api/servers/:id/channels
pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
    WithRejection(Json(body), _): ApiJson<CreateChannelRequest>,
) -> Created<ChannelRow> {
    let channel = state
        .engine
        .create_channel(
            &auth.user_id,
            &server_id,
            &body.name,
            body.description.as_deref(),
        )
        .await?;
    created(channel)
}

/// GET /api/channels/:id
pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(channel_id), _): ApiPath<String>,
) -> ApiResult<ChannelRow> {
    Ok(Json(state.engine.get_channel(&auth.user_id, &channel_id).await?))
}

/// PATCH /api/channels/:id: rename, describe or move.
pub async fn update_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(channel_id), _): ApiPath<String>,
    WithRejection(Json(patch), _): ApiJson<ChannelPatch>,
) -> ApiResult<ChannelRow> {
    Ok(Json(
        state
            .engine
            .update_channel(&auth.user_id, &channel_id, patch)
            .await?,
    ))
}

/// DELETE /api/channels/:id
pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(channel_id), _): ApiPath<String>,
) -> Result<StatusCode, EngineError> {
    state
        .engine
        .delete_channel(&auth.user_id, &channel_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Messages ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub before: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
    /// Client correlation token echoed in the `created` event. Ignored on edit.
    #[serde(default)]
    pub nonce: Option<String>,
}

/// GET /api/channels/:id/messages?before=&limit=
pub async fn message_history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(channel_id), _): ApiPath<String>,
    WithRejection(Query(params), _): ApiQuery<HistoryParams>,
) -> ApiResult<MessageHistory> {
    Ok(Json(
        state
            .engine
            .message_history(
                &auth.user_id,
                &channel_id,
                params.before.as_deref(),
                params.limit,
            )
            .await?,
    ))
}

/// POST /api/channels/:id/messages
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(channel_id), _): ApiPath<String>,
    WithRejection(Json(body), _): ApiJson<MessageRequest>,
) -> Created<MessageRow> {
    let message = state
        .engine
        .post_message_with_nonce(&auth.user_id, &channel_id, &body.content, body.nonce.as_deref())
        .await?;
    created(message)
}

/// GET /api/messages/:id
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(message_id), _): ApiPath<String>,
) -> ApiResult<MessageRow> {
    Ok(Json(state.engine.get_message(&auth.user_id, &message_id).await?))
}

/// PATCH /api/messages/:id (author only)
pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(message_id), _): ApiPath<String>,
    WithRejection(Json(body), _): ApiJson<MessageRequest>,
) -> ApiResult<MessageRow> {
    Ok(Json(
        state
            .engine
            .edit_message(&auth.user_id, &message_id, &body.content)
            .await?,
    ))
}

/// DELETE /api/messages/:id
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(message_id), _): ApiPath<String>,
) -> Result<StatusCode, EngineError> {
    state
        .engine
        .delete_message(&auth.user_id, &message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Invites ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteRequest {
    pub max_uses: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// GET /api/servers/:id/invites
pub async fn list_invites(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
) -> ApiResult<Vec<InviteRow>> {
    Ok(Json(state.engine.list_invites(&auth.user_id, &server_id).await?))
}

/// POST /api/servers/:id/invites
pub async fn create_invite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(server_id), _): ApiPath<String>,
    WithRejection(Json(body), _): ApiJson<CreateInviteRequest>,
) -> Created<InviteRow> {
    let invite = state
        .engine
        .create_invite(&auth.user_id, &server_id, body.max_uses, body.expires_at)
        .await?;
    created(invite)
}

/// GET /api/invites/:code (public)
pub async fn preview_invite(
    State(state): State<Arc<AppState>>,
    WithRejection(Path(code), _): ApiPath<String>,
) -> ApiResult<InvitePreview> {
    Ok(Json(state.engine.preview_invite(&code).await?))
}

/// POST /api/invites/:code: join the invite's server.
pub async fn redeem_invite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(code), _): ApiPath<String>,
) -> ApiResult<MemberRow> {
    Ok(Json(state.engine.redeem_invite(&auth.user_id, &code).await?))
}

/// DELETE /api/invites/:code
pub async fn revoke_invite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(code), _): ApiPath<String>,
) -> Result<StatusCode, EngineError> {
    state.engine.revoke_invite(&auth.user_id, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Bots ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBotRequest {
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

/// GET /api/bots: the caller's bots.
pub async fn list_bots(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<Vec<BotRow>> {
    Ok(Json(state.engine.list_bots(&auth.user_id).await?))
}

/// POST /api/bots: the response carries the bot's token, shown only once.
pub async fn create_bot(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Json(body), _): ApiJson<CreateBotRequest>,
) -> Created<CreatedBot> {
    let bot = state
        .engine
        .create_bot(
            &auth.user_id,
            &body.name,
            body.description.as_deref(),
            body.avatar_url.as_deref(),
        )
        .await?;
    created(bot)
}

/// GET /api/bots/:id (owner only)
pub async fn get_bot(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(bot_id), _): ApiPath<String>,
) -> ApiResult<BotRow> {
    Ok(Json(state.engine.get_bot(&auth.user_id, &bot_id).await?))
}

/// PATCH /api/bots/:id (owner only)
pub async fn update_bot(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(bot_id), _): ApiPath<String>,
    WithRejection(Json(patch), _): ApiJson<BotPatch>,
) -> ApiResult<BotRow> {
    Ok(Json(state.engine.update_bot(&auth.user_id, &bot_id, patch).await?))
}

/// DELETE /api/bots/:id (owner only)
pub async fn delete_bot(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    WithRejection(Path(bot_id), _): ApiPath<String>,
) -> Result<StatusCode, EngineError> {
    state.engine.delete_bot(&auth.user_id, &bot_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/bots/:id/profile (public)
pub async fn bot_profile(
    State(state): State<Arc<AppState>>,
    WithRejection(Path(bot_id), _): ApiPath<String>,
) -> ApiResult<BotProfile> {
    Ok(Json(state.engine.bot_profile(&bot_id).await?))
}
