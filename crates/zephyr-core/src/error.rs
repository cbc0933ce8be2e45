//! Error types for Zephyr.
//!
//! [`ZephyrError`] is the failure taxonomy of HTTP dispatch. Every variant
//! maps to exactly one status code and renders to a plain-text response
//! through [`ZephyrError::into_response`].
//!
//! | Variant | Status |
//! |---|---|
//! | `NotFound` | 404 |
//! | `MethodNotAllowed` | 405 |
//! | `Validation` | 400 |
//! | `ResponseContract` | 500 |
//! | `MiddlewareProtocol` | 500 |
//! | `Handler` | 500 |
//! | `Internal` | 500 |

use std::fmt;

use http::{Method, StatusCode};
use thiserror::Error;

use crate::schema::ValidationError;
use crate::types::{Response, ResponseExt};

/// Result type alias using [`ZephyrError`].
pub type ZephyrResult<T> = Result<T, ZephyrError>;

/// Which part of the request failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationTarget {
    /// Captured path parameters.
    Params,
    /// The decoded query string.
    Query,
    /// The request body.
    Body,
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Params => "params",
            Self::Query => "query",
            Self::Body => "body",
        })
    }
}

/// Standard error type for Zephyr.
///
/// # Example
///
/// ```
/// use zephyr_core::{ValidationError, ValidationTarget, ZephyrError};
/// use http::StatusCode;
///
/// let err = ZephyrError::validation(ValidationTarget::Query, ValidationError::new("page must be a number"));
/// assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
/// assert_eq!(err.to_string(), "Invalid query: page must be a number");
/// ```
#[derive(Error, Debug)]
pub enum ZephyrError {
    /// No route matches the path for the protocol.
    #[error("Not Found")]
    NotFound {
        /// The requested path.
        path: String,
    },

    /// A route matches the path but has no handler for the method.
    #[error("Method Not Allowed")]
    MethodNotAllowed {
        /// The rejected method.
        method: Method,
        /// The requested path.
        path: String,
    },

    /// Incoming params, query or body failed their schema.
    #[error("Invalid {target}: {source}")]
    Validation {
        /// What was being validated.
        target: ValidationTarget,
        /// The validator's report.
        #[source]
        source: ValidationError,
    },

    /// The handler produced a body that fails the declared response schema.
    #[error("Invalid response: {source}")]
    ResponseContract {
        /// The validator's report.
        #[source]
        source: ValidationError,
    },

    /// A middleware invoked `next` more than once.
    #[error("next() called multiple times in middleware `{middleware}`")]
    MiddlewareProtocol {
        /// Name of the offending middleware.
        middleware: String,
    },

    /// A handler failed or panicked.
    #[error("Handler error: {message}")]
    Handler {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Internal server error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl ZephyrError {
    /// Creates a not-found error for `path`.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates a method-not-allowed error.
    #[must_use]
    pub fn method_not_allowed(method: Method, path: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            method,
            path: path.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(target: ValidationTarget, source: ValidationError) -> Self {
        Self::Validation { target, source }
    }

    /// Creates a response contract error.
    #[must_use]
    pub fn response_contract(source: ValidationError) -> Self {
        Self::ResponseContract { source }
    }

    /// Creates a middleware protocol error.
    #[must_use]
    pub fn middleware_protocol(middleware: impl Into<String>) -> Self {
        Self::MiddlewareProtocol {
            middleware: middleware.into(),
        }
    }

    /// Creates a handler error from an underlying failure.
    #[must_use]
    pub fn handler(source: impl Into<anyhow::Error>) -> Self {
        let source = source.into();
        Self::Handler {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates an internal error with a message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a message and source.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::ResponseContract { .. }
            | Self::MiddlewareProtocol { .. }
            | Self::Handler { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true for errors caused by the client.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Renders the error as a plain-text response.
    ///
    /// Client errors carry their message; server errors carry the message
    /// only for response contract failures, which describe the handler's
    /// output rather than internal state.
    #[must_use]
    pub fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::NotFound { .. }
            | Self::MethodNotAllowed { .. }
            | Self::Validation { .. }
            | Self::ResponseContract { .. } => self.to_string(),
            _ => "Internal Server Error".to_string(),
        };
        Response::text(status, body)
    }
}
