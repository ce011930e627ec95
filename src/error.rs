use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A pool construction error.
    #[error("Pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A kubeconfig parsing or loading error.
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// An error returned by the Kubernetes API.
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller has no usable session.
    #[error("session expired or invalid")]
    SessionExpired,

    /// A resource not found error.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The target session has no live delivery channel.
    #[error("session not connected: {0}")]
    NotConnected(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable".to_string())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Pool creation error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database unavailable".to_string())
            }

            AppError::Kubeconfig(ref e) => {
                tracing::error!("Kubeconfig error: {}", e);
                (StatusCode::BAD_GATEWAY, "Invalid cluster configuration".to_string())
            }

            AppError::Kube(ref e) => {
                tracing::error!("Kubernetes error: {}", e);
                (StatusCode::BAD_GATEWAY, "Kubernetes API error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string())
            }

            AppError::Json(ref e) => {
                tracing::debug!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e))
            }

            AppError::SessionExpired => {
                tracing::warn!("Rejected request without a usable session");
                (StatusCode::UNAUTHORIZED, "session expired or invalid".to_string())
            }

            AppError::NotFound(ref what) => {
                tracing::debug!("Resource not found: {}", what);
                (StatusCode::NOT_FOUND, format!("{} not found", what))
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
            }

            AppError::NotConnected(ref sid) => {
                tracing::warn!("Session not connected: {}", sid);
                (StatusCode::CONFLICT, "session not connected".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(axum::http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
