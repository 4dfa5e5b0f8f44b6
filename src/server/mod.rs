//! Engine adapter seam.
//!
//! Engine bindings (one per embedded HTTP server) decode their native request
//! into a [`RawRequest`], wrap their connection's write side in a
//! [`ResponseWriter`](crate::context::ResponseWriter), and pass both to an
//! [`HttpHandler`]. The core owns everything from that point on; engines
//! never see routes, handlers, or error policy.

pub mod request;

pub use request::RawRequest;

use crate::context::ResponseWriter;

/// The entry point an engine calls once per decoded request.
///
/// [`MultiAppDispatcher`](crate::app::MultiAppDispatcher) is the primary
/// implementation; a single [`Application`](crate::app::Application) mounted
/// alone behaves identically.
pub trait HttpHandler: Send + Sync {
    fn handle(&self, request: RawRequest, writer: Box<dyn ResponseWriter>);
}
