use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::agent::goals::GoalError;
use crate::followup::ScheduleError;

/// Error returned by HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                tracing::error!("Request failed: {:#}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::ConversationNotFound(_) | ScheduleError::NotFound(_) => {
                Self::NotFound(e.to_string())
            }
            ScheduleError::OptedOut => Self::Conflict(e.to_string()),
            ScheduleError::InvalidTime(_) => Self::BadRequest(e.to_string()),
            ScheduleError::Store(inner) => Self::Internal(inner),
        }
    }
}

impl From<GoalError> for ApiError {
    fn from(e: GoalError) -> Self {
        match e {
            GoalError::ConversationNotFound(_) | GoalError::NoActiveGoal(_) => {
                Self::NotFound(e.to_string())
            }
            GoalError::Store(inner) => Self::Internal(inner),
        }
    }
}
