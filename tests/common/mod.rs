#![allow(dead_code)]

use manifold::context::{BufferedWriter, Context, SharedResponse};
use manifold::error::DefaultErrorHandler;
use manifold::ids::RequestId;
use manifold::server::RawRequest;
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Configure the may runtime and tracing output once per test binary.
pub fn setup() {
    INIT.call_once(|| {
        may::config().set_stack_size(0x8000);
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A Context over a buffered writer, plus the handle for inspecting what was
/// written.
pub fn buffered_context(raw: RawRequest) -> (Context, SharedResponse) {
    let (writer, shared) = BufferedWriter::new();
    let ctx = Context::from_raw(
        raw,
        Box::new(writer),
        Arc::new(DefaultErrorHandler),
        std::env::temp_dir(),
        RequestId::new(),
    );
    (ctx, shared)
}
