//! Request routing.
//!
//! Routes are registered in code, one `(method, pattern)` pair at a time, and
//! matched in registration order with first match winning. Patterns are plain
//! segment lists, no regular expressions:
//!
//! - literal segments match exactly;
//! - `{name}` matches one non-empty segment and binds it, percent-decoded;
//! - a final `*` matches the remaining path (possibly empty) under `*`.
//!
//! Malformed patterns are rejected at registration with a
//! [`PatternError`](crate::error::PatternError), never at request time.

mod core;

pub use self::core::{
    PathPattern, Route, RouteMatch, Router, Segment, MAX_INLINE_PARAMS, ParamVec,
};
