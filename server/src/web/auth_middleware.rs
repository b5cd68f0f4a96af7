use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::engine::error::EngineError;

use super::app_state::AppState;

/// Extractor that resolves the `Authorization: Bearer <token>` header to an
/// active user id. Use this in any handler that requires authentication.
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = EngineError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| EngineError::Unauthenticated)?;

        let user_id = state.engine.resolve_principal(bearer.token()).await?;
        Ok(AuthUser { user_id })
    }
}
