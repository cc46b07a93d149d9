//! Provider-call error types.

use std::error::Error as StdError;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A JSON-RPC 2.0 error object as returned by a node.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("JSON-RPC error {code}: {message}")]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// One failed provider attempt inside a [`TransportError::Exhausted`] error.
#[derive(Debug, Clone)]
pub struct AttemptError {
    pub provider: String,
    pub error: Arc<TransportError>,
}

/// Errors that can occur while calling an RPC provider.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed before a response arrived (connection refused, reset, DNS).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The local rate limiter rejected the call.
    #[error("Rate limit exceeded (provider: {provider})")]
    RateLimited { provider: String },

    /// No provider could be attempted at all.
    #[error("All providers unavailable")]
    AllProvidersDown,

    /// Every attempted provider failed.
    #[error("all providers failed: {}", format_attempts(.attempts))]
    Exhausted { attempts: Vec<AttemptError> },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An error from a foreign client library. The wrapper may be empty.
    #[error("wrapped error: {}", describe_wrapped(.0))]
    Wrapped(Option<Arc<dyn StdError + Send + Sync>>),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

/// Result of trying to pull a provider error code out of an error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeExtraction {
    /// The error carries a JSON-RPC error code.
    Code(i64),
    /// The error is well-formed but carries no code.
    NoCode,
    /// The error's shape could not be inspected (an empty wrapper).
    Unextractable,
}

impl TransportError {
    /// Wrap an error from a foreign client library.
    pub fn wrap<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Wrapped(Some(Arc::new(err)))
    }

    /// Extract the JSON-RPC error code, looking through wrappers.
    ///
    /// Total: every shape maps to a [`CodeExtraction`] and nothing panics.
    /// An [`Exhausted`](Self::Exhausted) error answers for its last attempt.
    pub fn error_code(&self) -> CodeExtraction {
        match self {
            Self::Rpc(e) => CodeExtraction::Code(e.code),
            Self::Wrapped(None) => CodeExtraction::Unextractable,
            Self::Wrapped(Some(inner)) => {
                let inner: &(dyn StdError + 'static) = inner.as_ref();
                match inner.downcast_ref::<TransportError>() {
                    Some(transport) => transport.error_code(),
                    None => match inner.downcast_ref::<JsonRpcError>() {
                        Some(rpc) => CodeExtraction::Code(rpc.code),
                        None => CodeExtraction::NoCode,
                    },
                }
            }
            Self::Exhausted { attempts } => match attempts.last() {
                Some(last) => last.error.error_code(),
                None => CodeExtraction::NoCode,
            },
            _ => CodeExtraction::NoCode,
        }
    }

    /// The HTTP status code, if this error carries one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Wrapped(Some(inner)) => {
                let inner: &(dyn StdError + 'static) = inner.as_ref();
                inner
                    .downcast_ref::<TransportError>()
                    .and_then(TransportError::http_status)
            }
            Self::Exhausted { attempts } => attempts.last().and_then(|a| a.error.http_status()),
            _ => None,
        }
    }
}

fn format_attempts(attempts: &[AttemptError]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_wrapped(inner: &Option<Arc<dyn StdError + Send + Sync>>) -> String {
    match inner {
        Some(e) => e.to_string(),
        None => "<nil>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection reset by peer")]
    struct ForeignError;

    #[test]
    fn rpc_error_code_is_extracted() {
        let err = TransportError::Rpc(JsonRpcError::new(-32601, "method not found"));
        assert_eq!(err.error_code(), CodeExtraction::Code(-32601));
    }

    #[test]
    fn empty_wrapper_is_unextractable() {
        let err = TransportError::Wrapped(None);
        assert_eq!(err.error_code(), CodeExtraction::Unextractable);
        assert_eq!(err.to_string(), "wrapped error: <nil>");
    }

    #[test]
    fn code_found_through_wrapper() {
        let inner = TransportError::Rpc(JsonRpcError::new(-32015, "vm execution error"));
        let err = TransportError::wrap(inner);
        assert_eq!(err.error_code(), CodeExtraction::Code(-32015));
    }

    #[test]
    fn foreign_error_has_no_code() {
        let err = TransportError::wrap(ForeignError);
        assert_eq!(err.error_code(), CodeExtraction::NoCode);
        assert_eq!(err.to_string(), "wrapped error: connection reset by peer");
    }

    #[test]
    fn exhausted_lists_every_attempt() {
        let err = TransportError::Exhausted {
            attempts: vec![
                AttemptError {
                    provider: "a".into(),
                    error: Arc::new(TransportError::Http("refused".into())),
                },
                AttemptError {
                    provider: "b".into(),
                    error: Arc::new(TransportError::HttpStatus {
                        status: 503,
                        body: "unavailable".into(),
                    }),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "all providers failed: a: HTTP error: refused; b: HTTP 503: unavailable"
        );
        assert_eq!(err.http_status(), Some(503));
    }

    #[test]
    fn code_found_in_wrapped_json_rpc_error() {
        let err = TransportError::wrap(JsonRpcError::new(-32601, "nope"));
        assert_eq!(err.error_code(), CodeExtraction::Code(-32601));
        assert_eq!(err.to_string(), "wrapped error: JSON-RPC error -32601: nope");
    }
}
