//! Provider error classification.
//!
//! Every call error is sorted into one [`ErrorKind`]. Only [`ErrorKind::Other`]
//! is *critical*: it is the one kind that marks the responsible provider down.
//! The rest describe conditions that say nothing bad about the provider:
//!
//! | kind        | meaning                                                     |
//! |-------------|-------------------------------------------------------------|
//! | `None`      | the call succeeded                                          |
//! | `NotFound`  | this provider does not have the data (pruned state, method) |
//! | `RateLimit` | the provider (or the local limiter) is throttling us        |
//! | `VmError`   | the contract call itself failed                             |
//! | `Other`     | anything else, including transport failures                 |
//!
//! Timeouts are tracked separately by [`is_timeout`]; a timeout is `Other`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CodeExtraction, TransportError};

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

/// Error code some providers use for EVM execution failures.
pub const VM_ERROR_CODE: i64 = -32015;

/// Phrases a node uses when it lacks the requested data.
const NOT_FOUND_PHRASES: &[&str] = &[
    "missing trie node",
    "header not found",
    "unknown block",
    "historical state",
    "state is not available",
    "required historical state unavailable",
    "method not found",
    "does not exist/is not available",
];

/// Phrases providers use when throttling.
const RATE_LIMIT_PHRASES: &[&str] = &[
    "backoff_seconds",
    "has exceeded its throughput limit",
    "request rate exceeded",
    "too many requests",
    "rate limit exceeded",
];

/// EVM execution failures, including the insufficient-funds pre-check.
const VM_ERROR_PHRASES: &[&str] = &[
    "insufficient funds for gas * price + value",
    "insufficient funds",
    "out of gas",
    "contract creation code storage out of gas",
    "max call depth exceeded",
    "insufficient balance for transfer",
    "contract address collision",
    "execution reverted",
    "max code size exceeded",
    "max initcode size exceeded",
    "invalid jump destination",
    "write protection",
    "return data out of bounds",
    "gas uint64 overflow",
    "invalid code: must not begin with 0xef",
    "nonce uint64 overflow",
];

const TIMEOUT_PHRASES: &[&str] = &["deadline exceeded", "timed out", "timeout"];

// ─── ErrorKind ────────────────────────────────────────────────────────────────

/// Classification of a provider call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    NotFound,
    RateLimit,
    VmError,
    Other,
}

impl ErrorKind {
    /// Returns `true` for the one kind that marks a provider down.
    pub fn is_critical(self) -> bool {
        self == Self::Other
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::NotFound => write!(f, "not_found"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::VmError => write!(f, "vm_error"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ─── Classification ───────────────────────────────────────────────────────────

/// Classify a call outcome. `None` means the call succeeded.
pub fn classify(err: Option<&TransportError>) -> ErrorKind {
    match err {
        None => ErrorKind::None,
        Some(err) => classify_error(err),
    }
}

/// Classify a call error.
///
/// Total and side-effect free. An error whose code cannot be extracted is
/// `Other` without further inspection.
pub fn classify_error(err: &TransportError) -> ErrorKind {
    let code = match err.error_code() {
        CodeExtraction::Unextractable => return ErrorKind::Other,
        CodeExtraction::Code(code) => Some(code),
        CodeExtraction::NoCode => None,
    };

    if let TransportError::Exhausted { attempts } = err {
        return match attempts.last() {
            Some(last) => classify_error(&last.error),
            None => ErrorKind::Other,
        };
    }

    let message = err.to_string().to_lowercase();

    if code == Some(METHOD_NOT_FOUND_CODE) || contains_any(&message, NOT_FOUND_PHRASES) {
        return ErrorKind::NotFound;
    }
    if is_rate_limit(err, &message) {
        return ErrorKind::RateLimit;
    }
    if code == Some(VM_ERROR_CODE) || contains_any(&message, VM_ERROR_PHRASES) {
        return ErrorKind::VmError;
    }
    ErrorKind::Other
}

/// Returns `true` if the error represents an exceeded deadline.
pub fn is_timeout(err: Option<&TransportError>) -> bool {
    match err {
        None => false,
        Some(TransportError::Timeout { .. }) => true,
        Some(TransportError::Exhausted { attempts }) => attempts
            .last()
            .is_some_and(|last| is_timeout(Some(&last.error))),
        Some(TransportError::Wrapped(None)) => false,
        Some(other) => contains_any(&other.to_string().to_lowercase(), TIMEOUT_PHRASES),
    }
}

/// Returns `true` if the outcome must not mark the provider down.
pub fn is_non_critical(err: Option<&TransportError>) -> bool {
    !classify(err).is_critical()
}

fn is_rate_limit(err: &TransportError, message: &str) -> bool {
    if matches!(err, TransportError::RateLimited { .. }) {
        return true;
    }
    if err.http_status() == Some(429) {
        return true;
    }
    contains_any(message, RATE_LIMIT_PHRASES)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::{AttemptError, JsonRpcError};

    fn rpc(code: i64, message: &str) -> TransportError {
        TransportError::Rpc(JsonRpcError::new(code, message))
    }

    #[test]
    fn success_is_none() {
        assert_eq!(classify(None), ErrorKind::None);
        assert!(!is_timeout(None));
        assert!(is_non_critical(None));
    }

    #[test]
    fn empty_wrapper_is_other() {
        let err = TransportError::Wrapped(None);
        assert_eq!(classify(Some(&err)), ErrorKind::Other);
        assert!(!is_timeout(Some(&err)));
    }

    #[test]
    fn wrapped_json_rpc_error_classifies_by_code() {
        let missing = TransportError::wrap(JsonRpcError::new(METHOD_NOT_FOUND_CODE, "nope"));
        assert_eq!(classify_error(&missing), ErrorKind::NotFound);

        let vm = TransportError::wrap(JsonRpcError::new(VM_ERROR_CODE, "boom"));
        assert_eq!(classify_error(&vm), ErrorKind::VmError);
        assert!(is_non_critical(Some(&vm)));
    }

    #[test]
    fn wrapped_empty_wrapper_is_other() {
        let err = TransportError::wrap(TransportError::Wrapped(None));
        assert_eq!(classify(Some(&err)), ErrorKind::Other);
    }

    #[test]
    fn not_found_by_code_and_phrase() {
        assert_eq!(classify_error(&rpc(METHOD_NOT_FOUND_CODE, "nope")), ErrorKind::NotFound);
        assert_eq!(
            classify_error(&rpc(-32000, "missing trie node 0xabc (path )")),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify_error(&TransportError::Other("header not found".into())),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn rate_limit_phrasings() {
        for msg in [
            "project ID request rate exceeded",
            "{\"backoff_seconds\": 30}",
            "Your app has exceeded its throughput limit",
        ] {
            assert_eq!(
                classify_error(&TransportError::Other(msg.into())),
                ErrorKind::RateLimit,
                "{msg}"
            );
        }
        let throttled = TransportError::HttpStatus { status: 429, body: String::new() };
        assert_eq!(classify_error(&throttled), ErrorKind::RateLimit);
        let local = TransportError::RateLimited { provider: "infura".into() };
        assert_eq!(classify_error(&local), ErrorKind::RateLimit);
    }

    #[test]
    fn vm_errors() {
        assert_eq!(classify_error(&rpc(VM_ERROR_CODE, "boom")), ErrorKind::VmError);
        assert_eq!(classify_error(&rpc(3, "execution reverted")), ErrorKind::VmError);
        assert_eq!(
            classify_error(&rpc(-32000, "insufficient funds for gas * price + value")),
            ErrorKind::VmError
        );
    }

    #[test]
    fn transport_failures_are_critical() {
        let refused = TransportError::Http("connection refused".into());
        assert_eq!(classify_error(&refused), ErrorKind::Other);
        assert!(ErrorKind::Other.is_critical());
        let unavailable = TransportError::HttpStatus { status: 503, body: "bad gateway".into() };
        assert!(!is_non_critical(Some(&unavailable)));
    }

    #[test]
    fn timeout_is_independent_of_kind() {
        let err = TransportError::Timeout { ms: 5_000 };
        assert_eq!(classify_error(&err), ErrorKind::Other);
        assert!(is_timeout(Some(&err)));

        let wrapped = TransportError::Other("context deadline exceeded".into());
        assert!(is_timeout(Some(&wrapped)));
        assert!(!is_timeout(Some(&TransportError::Http("refused".into()))));
    }

    #[test]
    fn exhausted_is_classified_by_last_attempt() {
        let err = TransportError::Exhausted {
            attempts: vec![
                AttemptError {
                    provider: "a".into(),
                    error: Arc::new(TransportError::Http("refused".into())),
                },
                AttemptError {
                    provider: "b".into(),
                    error: Arc::new(rpc(-32000, "header not found")),
                },
            ],
        };
        assert_eq!(classify_error(&err), ErrorKind::NotFound);
        assert_eq!(
            classify_error(&TransportError::Exhausted { attempts: vec![] }),
            ErrorKind::Other
        );
    }

    #[test]
    fn cancellation_is_other() {
        assert_eq!(classify_error(&TransportError::Cancelled), ErrorKind::Other);
    }
}
