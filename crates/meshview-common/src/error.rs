//! Error types for meshview
//!
//! Errors carry enough context to tell a caller whether to fix their input
//! (bad request), ask for access (forbidden), or retry (upstream failure).
//! The HTTP rendering follows the Kubernetes `Status` shape so clients that
//! already understand API server errors can read ours.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for meshview operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed or invalid request parameter
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of what's invalid
        message: String,
        /// The offending parameter (e.g., "duration", "graphType")
        param: Option<String>,
    },

    /// Caller may not access the requested resource
    #[error("forbidden: {message}")]
    Forbidden {
        /// Description of what was denied
        message: String,
    },

    /// Requested object does not exist or is not visible
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was missing
        message: String,
    },

    /// Resource type string has no registry entry
    #[error("object type not found: {resource_type}")]
    UnknownResourceType {
        /// The unrecognized resource type
        resource_type: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "aggregation", "bootstrap")
        context: String,
    },
}

impl Error {
    /// Create a bad request error with the given message
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest {
            message: msg.into(),
            param: None,
        }
    }

    /// Create a bad request error naming the offending parameter
    pub fn bad_request_for_param(param: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BadRequest {
            message: msg.into(),
            param: Some(param.into()),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden {
            message: msg.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }

    /// Create an unknown resource type error
    pub fn unknown_resource_type(resource_type: impl Into<String>) -> Self {
        Self::UnknownResourceType {
            resource_type: resource_type.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Request validation and access errors require the caller to change
    /// something. Transient Kubernetes failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::BadRequest { .. } => false,
            Error::Forbidden { .. } => false,
            Error::NotFound { .. } => false,
            Error::UnknownResourceType { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether the error is an access denial, locally raised or from the API server
    pub fn is_forbidden(&self) -> bool {
        match self {
            Error::Forbidden { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 403,
            _ => false,
        }
    }

    /// HTTP status a handler should answer with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => StatusCode::from_u16(ae.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Error::Kube { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::UnknownResourceType { .. } => StatusCode::BAD_REQUEST,
            Error::Serialization { .. } => StatusCode::BAD_REQUEST,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
