//! Error types for RevForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidResearchPlan,
    UnknownExclusionReason,
    UnknownAppraisalTool,

    // Resource errors (4xxx)
    NotFound,
    TaskNotFound,
    RecordNotFound,

    // Conflict / workflow errors (5xxx)
    Conflict,
    DecisionConflict,
    WorkflowStateError,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    SourceError,
    CapabilityContractError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidResearchPlan => 1003,
            ErrorCode::UnknownExclusionReason => 1004,
            ErrorCode::UnknownAppraisalTool => 1005,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::TaskNotFound => 4002,
            ErrorCode::RecordNotFound => 4003,

            // Conflicts / workflow (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::DecisionConflict => 5002,
            ErrorCode::WorkflowStateError => 5003,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::SourceError => 8001,
            ErrorCode::CapabilityContractError => 8002,
            ErrorCode::UpstreamError => 8003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors: always surfaced to the caller, never retried
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid research plan: {message}")]
    InvalidResearchPlan { message: String },

    #[error("Unknown exclusion reason code: {code}")]
    UnknownExclusionReason { code: String },

    #[error("Unknown appraisal tool: {tool}")]
    UnknownAppraisalTool { tool: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Review task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Study record not found: {id}")]
    RecordNotFound { id: String },

    // Conflict errors: the original decision is preserved
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("A terminal human decision already exists for record {record_id} at stage {stage}")]
    DecisionConflict { record_id: String, stage: String },

    // Workflow state errors: stage guards rejected the transition
    #[error("Workflow state error: {message}")]
    WorkflowState { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External source errors: retried with backoff, then tolerated as
    // partial failure by the orchestrator
    #[error("Source '{source_name}' failed: {message}")]
    Source { source_name: String, message: String },

    // The automated-classification capability returned a payload outside
    // its contract
    #[error("Capability contract violation: {message}")]
    CapabilityContract { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidResearchPlan { .. } => ErrorCode::InvalidResearchPlan,
            AppError::UnknownExclusionReason { .. } => ErrorCode::UnknownExclusionReason,
            AppError::UnknownAppraisalTool { .. } => ErrorCode::UnknownAppraisalTool,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::TaskNotFound { .. } => ErrorCode::TaskNotFound,
            AppError::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::DecisionConflict { .. } => ErrorCode::DecisionConflict,
            AppError::WorkflowState { .. } => ErrorCode::WorkflowStateError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Source { .. } => ErrorCode::SourceError,
            AppError::CapabilityContract { .. } => ErrorCode::CapabilityContractError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidResearchPlan { .. }
            | AppError::UnknownExclusionReason { .. }
            | AppError::UnknownAppraisalTool { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::TaskNotFound { .. }
            | AppError::RecordNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict { .. }
            | AppError::DecisionConflict { .. }
            | AppError::WorkflowState { .. } => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            AppError::CapabilityContract { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Source { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None, // Should be filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::TaskNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Missing population description".into(),
            field: Some("population".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_decision_conflict_is_conflict() {
        let err = AppError::DecisionConflict {
            record_id: "r1".into(),
            stage: "title_abstract".into(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code().as_code(), 5002);
    }

    #[test]
    fn test_source_error_is_bad_gateway() {
        let err = AppError::Source {
            source_name: "pubmed".into(),
            message: "timeout after retries".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_server_error());
    }
}
