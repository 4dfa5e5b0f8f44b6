//! Applications and multi-app dispatch.
//!
//! An [`Application`] bundles a route table with per-app policy: its error
//! handler and its temp directory for upload spooling. A
//! [`MultiAppDispatcher`] mounts several applications behind one engine port
//! and hands each request to the first application whose router matches it.
//! Match probing is read-only; applications that do not win a request never
//! observe it.

use crate::context::{Context, ResponseWriter};
use crate::dispatch::{ExecutionController, Phase};
use crate::error::{DefaultErrorHandler, ErrorHandler, HandlerError};
use crate::ids::RequestId;
use crate::router::{Route, Router};
use crate::runtime_config::RuntimeConfig;
use crate::server::{HttpHandler, RawRequest};
use http::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One application: a named route table plus request policy.
pub struct Application {
    name: String,
    router: Router,
    error_handler: Arc<dyn ErrorHandler>,
    tmp_dir: PathBuf,
}

impl Application {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            router: Router::new(),
            error_handler: Arc::new(DefaultErrorHandler),
            tmp_dir: std::env::temp_dir(),
        }
    }

    /// Register a route. Registration order is match precedence.
    pub fn add(&mut self, route: Route) {
        self.router.add(route);
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.add(route);
        self
    }

    /// Replace the default error-handler policy.
    #[must_use]
    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Directory for spooling multipart uploads.
    #[must_use]
    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        Arc::clone(&self.error_handler)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("routes", &self.router.len())
            .field("tmp_dir", &self.tmp_dir)
            .finish_non_exhaustive()
    }
}

/// Routes each request to the first mounted application that matches it.
///
/// All applications share one execution controller and worker pool. The
/// mount order is the probe order.
pub struct MultiAppDispatcher {
    apps: Vec<Arc<Application>>,
    controller: ExecutionController,
}

impl MultiAppDispatcher {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            apps: Vec::new(),
            controller: ExecutionController::new(config),
        }
    }

    /// Mount an application. Later mounts only see requests no earlier
    /// mount matched.
    pub fn mount(&mut self, app: Application) {
        info!(
            app = app.name(),
            routes = app.router().len(),
            position = self.apps.len(),
            "application mounted"
        );
        self.apps.push(Arc::new(app));
    }

    #[must_use]
    pub fn apps(&self) -> &[Arc<Application>] {
        &self.apps
    }

    /// Methods under which any mounted application would serve this path.
    fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut allow = Vec::new();
        for app in &self.apps {
            for method in app.router().allowed_methods(path) {
                if !allow.contains(&method) {
                    allow.push(method);
                }
            }
        }
        allow
    }

    /// Policy for requests no application matched: the last-considered
    /// application's error handler and temp directory, or the defaults when
    /// nothing is mounted.
    fn fallback_policy(&self) -> (Arc<dyn ErrorHandler>, PathBuf) {
        self.apps.last().map_or_else(
            || {
                (
                    Arc::new(DefaultErrorHandler) as Arc<dyn ErrorHandler>,
                    std::env::temp_dir(),
                )
            },
            |app| (app.error_handler(), app.tmp_dir.clone()),
        )
    }
}

impl HttpHandler for MultiAppDispatcher {
    fn handle(&self, request: RawRequest, writer: Box<dyn ResponseWriter>) {
        let request_id = RequestId::from_header_or_new(request.header("x-request-id"));
        debug!(
            request_id = %request_id,
            phase = Phase::Received.as_str(),
            method = %request.method,
            path = request.path(),
            "request received"
        );

        // Probe mounted applications in order. Matching reads only the
        // method and path; no Context exists until an app wins.
        for app in &self.apps {
            if let Some(matched) = app.router().route(&request.method, request.path()) {
                debug!(request_id = %request_id, app = app.name(), "application matched");
                let ctx = Context::from_raw(
                    request,
                    writer,
                    app.error_handler(),
                    app.tmp_dir.clone(),
                    request_id,
                );
                self.controller.execute(matched, ctx);
                return;
            }
        }

        // Nothing matched: 405 when the path exists under other methods,
        // 404 otherwise.
        let err = {
            let allow = self.allowed_methods(request.path());
            if allow.is_empty() {
                HandlerError::NotFound {
                    method: request.method.clone(),
                    path: request.path().to_string(),
                }
            } else {
                HandlerError::MethodNotAllowed { allow }
            }
        };
        warn!(
            request_id = %request_id,
            method = %request.method,
            path = request.path(),
            status = err.status(),
            "no application matched"
        );
        let (error_handler, tmp_dir) = self.fallback_policy();
        let mut ctx = Context::from_raw(request, writer, error_handler, tmp_dir, request_id);
        ctx.send_error(&err);
        ctx.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BufferedWriter;
    use crate::dispatch::HandlerResult;

    #[test]
    fn unmatched_request_gets_404() {
        let dispatcher = MultiAppDispatcher::new(RuntimeConfig::default());
        let (writer, shared) = BufferedWriter::new();
        dispatcher.handle(RawRequest::new(Method::GET, "/nowhere"), Box::new(writer));
        let rec = shared.snapshot();
        assert_eq!(rec.status, 404);
        assert!(rec.finished);
    }

    #[test]
    fn fallback_uses_last_mounted_apps_policy() {
        struct SpoolTaggingHandler;
        impl ErrorHandler for SpoolTaggingHandler {
            fn apply(&self, ctx: &mut Context, err: &HandlerError) {
                let dir = ctx.tmp_dir().display().to_string();
                ctx.set_header("X-Spool-Dir", &dir);
                DefaultErrorHandler.apply(ctx, err);
            }
        }

        let mut dispatcher = MultiAppDispatcher::new(RuntimeConfig::default());
        dispatcher.mount(Application::new("first"));
        dispatcher.mount(
            Application::new("second")
                .with_error_handler(SpoolTaggingHandler)
                .with_tmp_dir("/var/spool/second"),
        );
        let (writer, shared) = BufferedWriter::new();
        dispatcher.handle(RawRequest::new(Method::GET, "/nowhere"), Box::new(writer));
        let rec = shared.snapshot();
        assert_eq!(rec.status, 404);
        assert_eq!(rec.header("X-Spool-Dir"), Some("/var/spool/second"));
    }

    #[test]
    fn method_mismatch_gets_405_with_allow() {
        let mut dispatcher = MultiAppDispatcher::new(RuntimeConfig::default());
        let app = Application::new("api").route(
            Route::new(Method::GET, "/things", |_: &mut Context| HandlerResult::Done).unwrap(),
        );
        dispatcher.mount(app);
        let (writer, shared) = BufferedWriter::new();
        dispatcher.handle(RawRequest::new(Method::DELETE, "/things"), Box::new(writer));
        let rec = shared.snapshot();
        assert_eq!(rec.status, 405);
        assert_eq!(rec.header("Allow"), Some("GET"));
    }
}
