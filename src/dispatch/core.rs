use crate::context::{Context, HeaderVec};
use crate::error::HandlerError;
use crate::router::{Route, RouteMatch};
use crate::runtime_config::RuntimeConfig;
use crate::stream::{self, StreamEvent};
use may::sync::mpsc::Receiver;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::worker_pool::{RequestJob, WorkerPool};

/// Where a route's handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// On the coroutine that carried the request. The default.
    #[default]
    Inline,
    /// On the shared worker pool, freeing the carrier coroutine.
    Worker,
}

/// Request lifecycle phase, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Routed,
    Executing,
    Detached,
    Resumed,
    Complete,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Received => "received",
            Phase::Routed => "routed",
            Phase::Executing => "executing",
            Phase::Detached => "detached",
            Phase::Resumed => "resumed",
            Phase::Complete => "complete",
        }
    }
}

/// A route handler.
///
/// Handlers either write through the Context directly and return
/// [`HandlerResult::Done`], or return a payload/channel and let the
/// controller do the writing.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &mut Context) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &mut Context) -> HandlerResult {
        self(ctx)
    }
}

/// A complete response produced away from the Context.
///
/// Detached handlers build one of these on their own thread and send it back
/// over the deferred channel; only the controller, back on the request side,
/// ever touches the Context with it.
#[derive(Debug, Clone)]
pub struct ResponsePayload {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Value,
}

impl ResponsePayload {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body,
        }
    }

    /// 200 with a JSON body.
    #[must_use]
    pub fn json(body: Value) -> Self {
        Self::new(200, body)
    }

    /// An error payload with a JSON `{"error": ..}` body.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::new(status, serde_json::json!({ "error": message }))
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.to_string()));
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a handler returns to the controller.
pub enum HandlerResult {
    /// The handler wrote (or chose not to write) through the Context itself.
    Done,
    /// A complete response, written and finalized by the controller.
    Immediate(ResponsePayload),
    /// The handler detached; the response arrives later on this channel.
    /// A dropped sender without a payload is a handler failure.
    Deferred(Receiver<ResponsePayload>),
    /// A stream of values; the controller pumps them into the response body.
    Stream(Receiver<StreamEvent>),
}

impl std::fmt::Debug for HandlerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerResult::Done => f.write_str("Done"),
            HandlerResult::Immediate(p) => f.debug_tuple("Immediate").field(p).finish(),
            HandlerResult::Deferred(_) => f.write_str("Deferred(..)"),
            HandlerResult::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Runs matched routes to completion.
///
/// One controller (and its worker pool) is shared by every application
/// mounted on a dispatcher.
pub struct ExecutionController {
    pool: WorkerPool,
}

impl ExecutionController {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            pool: WorkerPool::new(&config),
        }
    }

    /// Drive one matched request to a finished response. Never returns an
    /// error: every failure path ends in a response written through the
    /// Context.
    pub fn execute(&self, matched: RouteMatch, mut ctx: Context) {
        ctx.bind_path_params(matched.path_params);
        debug!(
            request_id = %ctx.request_id(),
            phase = Phase::Routed.as_str(),
            pattern = %matched.route.pattern.as_str(),
            execution = ?matched.route.execution,
            "route bound"
        );
        match matched.route.execution {
            ExecutionMode::Inline => run_request(&matched.route, &mut ctx),
            ExecutionMode::Worker => {
                let job = RequestJob {
                    route: Arc::clone(&matched.route),
                    ctx,
                };
                if let Err(job) = self.pool.submit(job) {
                    let mut ctx = job.ctx;
                    warn!(
                        request_id = %ctx.request_id(),
                        "worker pool unavailable, failing request"
                    );
                    ctx.send_error(&HandlerError::Unavailable);
                    ctx.end();
                }
            }
        }
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

/// Run one route's handler against its Context and finalize the response.
/// Shared by inline execution and the worker pool.
pub(crate) fn run_request(route: &Route, ctx: &mut Context) {
    debug!(
        request_id = %ctx.request_id(),
        phase = Phase::Executing.as_str(),
        pattern = %route.pattern.as_str(),
        "handler executing"
    );
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        route.handler.handle(ctx)
    }));
    match outcome {
        Err(panic) => {
            let message = panic_message(&panic);
            error!(
                request_id = %ctx.request_id(),
                pattern = %route.pattern.as_str(),
                panic_message = %message,
                "handler panicked"
            );
            ctx.send_error(&HandlerError::failure(message));
        }
        Ok(HandlerResult::Done) => {}
        Ok(HandlerResult::Immediate(payload)) => apply_payload(ctx, payload),
        Ok(HandlerResult::Deferred(rx)) => {
            debug!(
                request_id = %ctx.request_id(),
                phase = Phase::Detached.as_str(),
                "handler detached, awaiting deferred response"
            );
            match rx.recv() {
                Ok(payload) => {
                    debug!(
                        request_id = %ctx.request_id(),
                        phase = Phase::Resumed.as_str(),
                        status = payload.status,
                        "deferred response arrived"
                    );
                    apply_payload(ctx, payload);
                }
                Err(_) => {
                    ctx.send_error(&HandlerError::failure(
                        "detached handler dropped without completing",
                    ));
                }
            }
        }
        Ok(HandlerResult::Stream(rx)) => stream::bridge(ctx, &rx),
    }
    ctx.end();
    debug!(
        request_id = %ctx.request_id(),
        phase = Phase::Complete.as_str(),
        status = ctx.status(),
        "request complete"
    );
}

fn apply_payload(ctx: &mut Context, payload: ResponsePayload) {
    ctx.set_status(payload.status);
    for (name, value) in &payload.headers {
        ctx.set_header(name, value);
    }
    match payload.body {
        Value::Null => {}
        Value::String(text) => ctx.send_text(&text),
        body => ctx.send_value(&body),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
