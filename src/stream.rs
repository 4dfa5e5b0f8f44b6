//! Bridge between asynchronous value producers and the response stream.
//!
//! A streaming handler hands back a channel of [`StreamEvent`]s; the
//! execution controller pumps that channel into the request's Context. The
//! contract mirrors a reactive subscriber:
//!
//! - each value is written as one body chunk, in arrival order;
//! - the first error terminates the stream via the error-handler policy, and
//!   every event after it is ignored;
//! - completion writes nothing. Finalization is the controller's explicit
//!   `end` call, so an engine waiting on a detached response is released by
//!   that signal and not by the producer going quiet.

use crate::context::Context;
use crate::error::HandlerError;
use may::sync::mpsc::Receiver;
use serde_json::Value;
use tracing::debug;

/// One event from a streaming producer.
#[derive(Debug)]
pub enum StreamEvent {
    /// A value to append to the response body.
    Next(Value),
    /// Terminal failure. Everything after it is ignored.
    Error(HandlerError),
    /// Normal end of stream. Writes nothing.
    Complete,
}

/// Consumer side of a value stream.
pub trait Subscriber {
    fn on_next(&mut self, value: Value);
    fn on_error(&mut self, err: HandlerError);
    fn on_complete(&mut self);
}

/// Subscriber that writes into a request Context.
pub struct ContextSubscriber<'a> {
    ctx: &'a mut Context,
    terminated: bool,
}

impl<'a> ContextSubscriber<'a> {
    #[must_use]
    pub fn new(ctx: &'a mut Context) -> Self {
        Self {
            ctx,
            terminated: false,
        }
    }
}

impl Subscriber for ContextSubscriber<'_> {
    fn on_next(&mut self, value: Value) {
        if self.terminated {
            debug!(request_id = %self.ctx.request_id(), "stream value after termination ignored");
            return;
        }
        self.ctx.send_value(&value);
    }

    fn on_error(&mut self, err: HandlerError) {
        if self.terminated {
            debug!(request_id = %self.ctx.request_id(), "stream error after termination ignored");
            return;
        }
        self.terminated = true;
        self.ctx.send_error(&err);
    }

    fn on_complete(&mut self) {
        self.terminated = true;
    }
}

/// Drain a stream channel into a subscriber.
///
/// Runs until the producer signals [`StreamEvent::Complete`] or drops its
/// sender; a dropped sender counts as completion. Events after the first
/// error are drained but ignored by the subscriber.
pub fn pump<S: Subscriber>(subscriber: &mut S, rx: &Receiver<StreamEvent>) {
    loop {
        match rx.recv() {
            Ok(StreamEvent::Next(value)) => subscriber.on_next(value),
            Ok(StreamEvent::Error(err)) => subscriber.on_error(err),
            Ok(StreamEvent::Complete) => {
                subscriber.on_complete();
                return;
            }
            Err(_) => {
                subscriber.on_complete();
                return;
            }
        }
    }
}

/// Pump a stream channel into a Context. Used by the execution controller
/// for [`HandlerResult::Stream`](crate::dispatch::HandlerResult::Stream).
pub(crate) fn bridge(ctx: &mut Context, rx: &Receiver<StreamEvent>) {
    let mut subscriber = ContextSubscriber::new(ctx);
    pump(&mut subscriber, rx);
}
