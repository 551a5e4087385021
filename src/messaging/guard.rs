//! Conversation-scoped request guard.
//!
//! Routes under `/api/conversations/{id}/...` run through
//! [`conversation_guard`], which loads the conversation once, rejects
//! non-participants and stashes the row in the request extensions so
//! handlers do not repeat the lookup.

use axum::{
    extract::{FromRequestParts, Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::ChatError;
use crate::server::state::AppState;
use crate::store::Conversation;

pub async fn conversation_guard(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())?;

    let conversation = state
        .service
        .conversation_for_participant(user.user_id, conversation_id)
        .await
        .map_err(|e| e.into_response())?;

    request.extensions_mut().insert(conversation);
    Ok(next.run(request).await)
}

/// The conversation loaded by [`conversation_guard`].
#[derive(Clone, Debug)]
pub struct RequestConversation(pub Conversation);

impl FromRequestParts<AppState> for RequestConversation {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Conversation>()
            .cloned()
            .map(RequestConversation)
            .ok_or_else(|| ChatError::NotFound("conversation").into_response())
    }
}
