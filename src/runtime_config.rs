//! Environment-variable runtime configuration.
//!
//! Tunables that affect the coroutine runtime and the shared worker pool:
//!
//! - `MANIFOLD_STACK_SIZE`: coroutine stack size in bytes, decimal or
//!   `0x`-prefixed hex (default `0x10000`, 64 KB). Total worker memory is
//!   `stack_size * workers`, so size it to the deepest handler call chain.
//! - `MANIFOLD_WORKERS`: number of worker coroutines in the shared pool
//!   (default 4).
//! - `MANIFOLD_QUEUE_BOUND`: advisory queue depth used for saturation
//!   logging (default 1024). Submissions queue when saturated; they are
//!   never rejected.

use std::env;

/// Runtime configuration loaded from environment variables.
///
/// Load once at startup with [`RuntimeConfig::from_env`] and pass to the
/// execution controller.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for worker coroutines in bytes.
    pub stack_size: usize,
    /// Number of worker coroutines in the shared pool.
    pub workers: usize,
    /// Advisory queue depth; exceeding it logs a saturation warning.
    pub queue_bound: usize,
}

const DEFAULT_STACK_SIZE: usize = 0x10000;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_BOUND: usize = 1024;

fn parse_size(value: &str) -> Option<usize> {
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for unset or unparseable values.
    #[must_use]
    pub fn from_env() -> Self {
        let stack_size = env::var("MANIFOLD_STACK_SIZE")
            .ok()
            .and_then(|v| parse_size(&v))
            .unwrap_or(DEFAULT_STACK_SIZE);
        let workers = env::var("MANIFOLD_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WORKERS);
        let queue_bound = env::var("MANIFOLD_QUEUE_BOUND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_QUEUE_BOUND);
        RuntimeConfig {
            stack_size,
            workers,
            queue_bound,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: DEFAULT_STACK_SIZE,
            workers: DEFAULT_WORKERS,
            queue_bound: DEFAULT_QUEUE_BOUND,
        }
    }
}
