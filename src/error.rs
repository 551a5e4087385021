//! Error taxonomy for the conversation subsystem.
//!
//! Every public operation returns either a typed success or one of these
//! enumerated failures; nothing throws past a component boundary. REST
//! handlers convert them to structured JSON responses, the gateway maps
//! them to `error` events on the open connection.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Conversation, message or participant does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Authenticated, but not allowed to touch this resource.
    #[error("{0}")]
    Forbidden(String),

    /// Invalid payload (bad role, empty content, attachment limits, ...).
    #[error("{0}")]
    BadRequest(String),

    /// System-of-record failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {self}");
        }
        // Do not leak database internals to clients.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(ChatError::NotFound("conversation").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ChatError::forbidden("not a participant").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ChatError::bad_request("counterpart is not a client").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ChatError::Store(StoreError::Database("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ChatError::Store(StoreError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn messages_are_descriptive() {
        assert_eq!(ChatError::NotFound("message").to_string(), "message not found");
        assert_eq!(
            ChatError::forbidden("only the salon can archive").to_string(),
            "only the salon can archive"
        );
    }
}
