//! Error taxonomy and error-handler policy.
//!
//! Two families of failures exist and they never mix:
//!
//! - Startup errors ([`PatternError`], [`AssetError`]) abort application
//!   construction. They are returned from constructors and are not
//!   recoverable per-request.
//! - Per-request errors ([`HandlerError`]) are always converted into an HTTP
//!   response by an [`ErrorHandler`]; they never propagate to the engine as
//!   an unhandled fault.

use http::Method;
use std::fmt;
use std::io;

/// A route path pattern that cannot be compiled.
///
/// Returned by `PathPattern::parse` at registration time. A malformed
/// pattern is a programming error in the route table and aborts startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// Pattern does not start with `/`.
    MissingLeadingSlash { pattern: String },
    /// A `{name}` segment with an empty name, or a brace that never closes.
    InvalidParam { segment: String },
    /// A `*` segment that is not the final segment of the pattern.
    WildcardNotLast { pattern: String },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::MissingLeadingSlash { pattern } => {
                write!(f, "route pattern '{pattern}' must start with '/'")
            }
            PatternError::InvalidParam { segment } => {
                write!(f, "invalid parameter segment '{segment}' in route pattern")
            }
            PatternError::WildcardNotLast { pattern } => {
                write!(
                    f,
                    "wildcard segment must be the last segment of route pattern '{pattern}'"
                )
            }
        }
    }
}

impl std::error::Error for PatternError {}

/// Construction-time failure of an asset source.
///
/// Fatal at startup: a missing webjar descriptor or a missing root directory
/// means the source cannot be built at all. Per-request lookup misses are
/// `None` from `AssetSource::resolve`, never an error.
#[derive(Debug)]
pub enum AssetError {
    /// The required resource (root path, webjar descriptor) does not exist.
    NotFound { location: String },
    /// An I/O failure while reading a construction-time resource.
    Io { location: String, source: io::Error },
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::NotFound { location } => {
                write!(f, "asset resource not found: {location}")
            }
            AssetError::Io { location, source } => {
                write!(f, "asset resource {location} unreadable: {source}")
            }
        }
    }
}

impl std::error::Error for AssetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetError::NotFound { .. } => None,
            AssetError::Io { source, .. } => Some(source),
        }
    }
}

/// A per-request failure. Every variant maps to a terminal HTTP response.
#[derive(Debug, Clone)]
pub enum HandlerError {
    /// No route (or no application) matched the request.
    NotFound { method: Method, path: String },
    /// The path exists under different methods.
    MethodNotAllowed { allow: Vec<Method> },
    /// A handler raised an unexpected failure while executing.
    Failure { message: String },
    /// The execution backend could not accept the request.
    Unavailable,
    /// The asynchronous producer behind a streaming response signaled an error.
    Stream { message: String },
    /// The client connection was closed while the request was in flight.
    Cancelled,
}

impl HandlerError {
    /// Construct a [`HandlerError::Failure`] from any displayable cause.
    pub fn failure(cause: impl fmt::Display) -> Self {
        HandlerError::Failure {
            message: cause.to_string(),
        }
    }

    /// HTTP status code this error renders as.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            HandlerError::NotFound { .. } => 404,
            HandlerError::MethodNotAllowed { .. } => 405,
            HandlerError::Failure { .. } | HandlerError::Stream { .. } => 500,
            HandlerError::Unavailable => 503,
            // The peer is gone; the status is never observed on the wire.
            HandlerError::Cancelled => 499,
        }
    }

    /// Short wire-safe message. Internal causes stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            HandlerError::NotFound { method, path } => format!("no route for {method} {path}"),
            HandlerError::MethodNotAllowed { .. } => "method not allowed".to_string(),
            HandlerError::Failure { message } => message.clone(),
            HandlerError::Stream { message } => message.clone(),
            HandlerError::Unavailable => "service unavailable".to_string(),
            HandlerError::Cancelled => "request cancelled".to_string(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.public_message())
    }
}

impl std::error::Error for HandlerError {}

/// Per-application policy mapping a [`HandlerError`] to a response.
///
/// Implementations write the full error response through the Context. The
/// framework guarantees `apply` is invoked at most once per request.
pub trait ErrorHandler: Send + Sync {
    fn apply(&self, ctx: &mut crate::context::Context, err: &HandlerError);
}

/// Default policy: JSON body `{"error": ..}` with the mapped status code.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn apply(&self, ctx: &mut crate::context::Context, err: &HandlerError) {
        let status = err.status();
        let mut body = serde_json::json!({ "error": err.public_message() });
        if let HandlerError::MethodNotAllowed { allow } = err {
            let allow_value = allow
                .iter()
                .map(Method::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            ctx.set_header("Allow", &allow_value);
            body["allow"] = serde_json::Value::String(allow_value);
        }
        ctx.set_status(status);
        ctx.send_value(&body);
        ctx.end();
    }
}
