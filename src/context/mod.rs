//! Per-request Context: one facade for reading the request and writing the
//! response, identical no matter which engine carried the bytes.
//!
//! A [`Context`] is created once per inbound request by the application
//! dispatcher, mutated by the matched route's handler and the execution
//! controller, and destroyed when the response is fully flushed or the
//! connection is terminated. It is never reused across requests.
//!
//! ## Engine seam
//!
//! Engines do not implement the Context themselves; they supply a
//! [`ResponseWriter`] (head/body/finish) and a parsed raw request, and the
//! core builds the Context on top. [`BufferedWriter`] is the in-memory
//! implementation used by tests and by engines that buffer whole responses.
//!
//! ## Response state machine
//!
//! Once the first byte of status/headers is flushed (`response_started`),
//! status code and headers are immutable; only body content may continue to
//! be written, in the order it is issued. A per-Context atomic write guard
//! enforces the at-most-one-in-flight-writer invariant, and a shared
//! [`CancelToken`] turns post-cancellation writes into silent no-ops.

mod core;
mod form;

pub use self::core::{
    status_reason, BufferedWriter, CancelToken, Context, HeaderVec, ResponseRecord,
    ResponseWriter, SharedResponse, MAX_INLINE_HEADERS,
};
pub use form::{FilePart, FormData, FormField};
