//! Typed error system with context and tracing

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AppError>;

/// Error context containing metadata about the error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub operation: String,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(service: &str, operation: &str) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            service: service.to_string(),
            operation: operation.to_string(),
            user_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Main engine error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    pub source: Option<String>,
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Validation
    InvalidParameters,

    // Resource errors
    NotFound,
    Conflict,
    InvalidState,

    // Business logic
    InsufficientBalance,
    Forbidden,

    // Storage
    Persistence,

    // System errors
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Only storage failures are worth retrying; everything else is a local validation result
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Persistence)
    }

    /// Get user-facing error message
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameters => "Parameters invalid",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Conflict => "Identity conflict detected",
            ErrorKind::InvalidState => "Operation not allowed in current state",
            ErrorKind::InsufficientBalance => "Insufficient balance",
            ErrorKind::Forbidden => "Account is blocked",
            ErrorKind::Persistence => "Ledger storage error",
            ErrorKind::Configuration => "Configuration error",
            ErrorKind::Internal => "Internal error",
        }
    }
}

impl AppError {
    /// Create new error with context
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        let message = message.into();

        // Log error based on severity
        match kind {
            ErrorKind::Internal | ErrorKind::Configuration => {
                error!(
                    error_id = %context.error_id,
                    service = %context.service,
                    operation = %context.operation,
                    "Critical error: {}", message
                );
            }
            ErrorKind::Persistence => {
                warn!(
                    error_id = %context.error_id,
                    service = %context.service,
                    operation = %context.operation,
                    "Storage error: {}", message
                );
            }
            _ => {
                tracing::debug!(
                    error_id = %context.error_id,
                    service = %context.service,
                    operation = %context.operation,
                    "Business error: {}", message
                );
            }
        }

        Self {
            kind,
            message,
            context,
            source: None,
        }
    }

    /// Add source error
    pub fn with_source(mut self, source: impl StdError) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Add metadata to error context
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.metadata.insert(key.to_string(), value);
        self
    }

    pub fn invalid_parameters(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::InvalidParameters, message, context)
    }

    pub fn not_found(resource: &str, id: &str, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("{} with id {} not found", resource, id),
            context,
        )
        .with_metadata("resource", serde_json::json!(resource))
        .with_metadata("id", serde_json::json!(id))
    }

    pub fn insufficient_balance(
        required: Decimal,
        available: Decimal,
        context: ErrorContext,
    ) -> Self {
        Self::new(
            ErrorKind::InsufficientBalance,
            format!("Required: {}, Available: {}", required, available),
            context,
        )
        .with_metadata("required", serde_json::json!(required.to_string()))
        .with_metadata("available", serde_json::json!(available.to_string()))
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.user_message(), self.message)
    }
}

impl StdError for AppError {}
