//! Handler execution.
//!
//! The execution controller owns everything between a successful route match
//! and a finished response: binding path parameters, choosing inline or
//! worker-pool execution, recovering from handler panics, and resuming
//! detached handlers when their deferred result arrives.

mod core;
mod worker_pool;

pub use self::core::{
    ExecutionController, ExecutionMode, Handler, HandlerResult, Phase, ResponsePayload,
};
pub use worker_pool::{RequestJob, WorkerPool, WorkerPoolMetrics};
