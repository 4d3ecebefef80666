// ⚠️ Error taxonomy shared by services, CLI and HTTP layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AkigError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AkigError>;

impl AkigError {
    pub fn validation(message: impl Into<String>) -> Self {
        AkigError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AkigError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        AkigError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Short machine-readable kind, used as the `error` field of API responses
    pub fn kind(&self) -> &'static str {
        match self {
            AkigError::Validation(_) => "validation_error",
            AkigError::NotFound { .. } => "not_found",
            AkigError::Conflict(_) => "conflict",
            AkigError::Unauthorized(_) => "unauthorized",
            AkigError::Forbidden(_) => "forbidden",
            AkigError::InvalidTransition { .. } => "invalid_transition",
            AkigError::Database(_) => "database_error",
            AkigError::Csv(_) => "csv_error",
            AkigError::Io(_) => "io_error",
            AkigError::Json(_) => "json_error",
            AkigError::Token(_) => "unauthorized",
            AkigError::Config(_) => "configuration_error",
            AkigError::Internal(_) => "internal_error",
        }
    }

    /// True when SQLite rejected a write because of a UNIQUE/CHECK/FK constraint
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            AkigError::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

#[cfg(feature = "server")]
mod http {
    use super::AkigError;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use serde_json::json;

    impl AkigError {
        pub fn status(&self) -> StatusCode {
            match self {
                AkigError::Validation(_) | AkigError::Csv(_) | AkigError::Json(_) => {
                    StatusCode::BAD_REQUEST
                }
                AkigError::NotFound { .. } => StatusCode::NOT_FOUND,
                AkigError::Conflict(_) | AkigError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                AkigError::Unauthorized(_) | AkigError::Token(_) => StatusCode::UNAUTHORIZED,
                AkigError::Forbidden(_) => StatusCode::FORBIDDEN,
                AkigError::Database(_)
                | AkigError::Io(_)
                | AkigError::Config(_)
                | AkigError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for AkigError {
        fn into_response(self) -> Response {
            let status = self.status();

            // Internal details stay in the logs
            let message = if status.is_server_error() {
                tracing::error!(error = %self, "request failed");
                "internal server error".to_string()
            } else {
                self.to_string()
            };

            (
                status,
                Json(json!({ "error": self.kind(), "message": message })),
            )
                .into_response()
        }
    }
}
