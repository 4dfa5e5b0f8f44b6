use crate::error::{ErrorHandler, HandlerError};
use crate::ids::RequestId;
use crate::router::ParamVec;
use crate::server::request::{parse_cookies, parse_query_params, split_target, RawRequest};
use http::Method;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::form::{parse_form, FormData};

/// Maximum inline headers before heap allocation.
/// Most requests carry well under 16 headers.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage for the hot path.
///
/// Header names use `Arc<str>` because the common names repeat across
/// requests and `Arc::clone()` is an O(1) atomic increment; values stay
/// `String` as per-request data.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Reason phrase for a status code.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// The write half of the engine adapter contract.
///
/// Each engine binding supplies one implementation per connection. The core
/// guarantees `write_head` is called at most once, before any `write_body`,
/// and that all calls for one Context come from at most one thread at a time.
pub trait ResponseWriter: Send {
    /// Flush the status line and headers.
    fn write_head(&mut self, status: u16, reason: &'static str, headers: &HeaderVec)
        -> io::Result<()>;
    /// Append a body chunk, preserving issue order.
    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()>;
    /// Finalize the exchange. The explicit completion signal engines wait
    /// for after a handler detaches. Must be idempotent.
    fn finish(&mut self) -> io::Result<()>;
}

/// Cancellation signal shared between the engine and an in-flight request.
///
/// Engines set it when the underlying connection closes; worker-side code
/// can poll it, and every Context write silently drops once it is set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a [`BufferedWriter`] recorded for one response.
#[derive(Debug, Clone, Default)]
pub struct ResponseRecord {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub head_written: bool,
    pub finished: bool,
}

impl ResponseRecord {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Observer handle onto a [`BufferedWriter`], safe to keep on another thread.
#[derive(Clone, Default)]
pub struct SharedResponse(Arc<(Mutex<ResponseRecord>, Condvar)>);

impl SharedResponse {
    /// Copy of the record as of now.
    #[must_use]
    pub fn snapshot(&self) -> ResponseRecord {
        match self.0 .0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Block until `finish` was called or the timeout elapses. Returns the
    /// finished record, or `None` on timeout.
    #[must_use]
    pub fn wait_finished(&self, timeout: Duration) -> Option<ResponseRecord> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = (&self.0 .0, &self.0 .1);
        let mut guard = match lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !guard.finished {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (next, timed_out) = match cvar.wait_timeout(guard, remaining) {
                Ok((g, t)) => (g, t.timed_out()),
                Err(poisoned) => (poisoned.into_inner().0, false),
            };
            guard = next;
            if timed_out && !guard.finished {
                return None;
            }
        }
        Some(guard.clone())
    }
}

/// In-memory [`ResponseWriter`]: records head, body and completion.
///
/// Used by tests in place of a live connection, and usable by engines that
/// assemble whole responses before flushing.
#[derive(Default)]
pub struct BufferedWriter {
    shared: SharedResponse,
}

impl BufferedWriter {
    /// Create a writer plus the observer handle for inspecting it later.
    #[must_use]
    pub fn new() -> (Self, SharedResponse) {
        let shared = SharedResponse::default();
        (
            Self {
                shared: shared.clone(),
            },
            shared,
        )
    }

    fn with_record<R>(&self, f: impl FnOnce(&mut ResponseRecord) -> R) -> R {
        let (lock, cvar) = (&self.shared.0 .0, &self.shared.0 .1);
        let mut guard = match lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let out = f(&mut guard);
        cvar.notify_all();
        out
    }
}

impl ResponseWriter for BufferedWriter {
    fn write_head(
        &mut self,
        status: u16,
        reason: &'static str,
        headers: &HeaderVec,
    ) -> io::Result<()> {
        self.with_record(|rec| {
            rec.status = status;
            rec.reason = reason;
            rec.headers = headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            rec.head_written = true;
        });
        Ok(())
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.with_record(|rec| rec.body.extend_from_slice(chunk));
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.with_record(|rec| rec.finished = true);
        Ok(())
    }
}

/// Per-request facade over request data and response writing.
///
/// See the [module docs](crate::context) for lifecycle and invariants.
pub struct Context {
    request_id: RequestId,
    method: Method,
    path: String,
    query: ParamVec,
    headers: HeaderVec,
    cookies: HeaderVec,
    body: Option<Vec<u8>>,
    declared_length: Option<u64>,
    remote_addr: Option<String>,
    form: Option<FormData>,
    path_params: ParamVec,
    attributes: HashMap<String, Value>,
    tmp_dir: PathBuf,
    error_handler: Arc<dyn ErrorHandler>,

    status: u16,
    content_type: Option<String>,
    response_headers: HeaderVec,
    started: bool,
    finished: bool,
    error_sent: bool,
    write_active: AtomicBool,
    cancel: CancelToken,
    writer: Box<dyn ResponseWriter>,
}

impl Context {
    /// Build a Context from a parsed raw request. Called once per request by
    /// the application dispatcher (or directly by a single-app engine
    /// binding).
    #[must_use]
    pub fn from_raw(
        raw: RawRequest,
        writer: Box<dyn ResponseWriter>,
        error_handler: Arc<dyn ErrorHandler>,
        tmp_dir: PathBuf,
        request_id: RequestId,
    ) -> Self {
        let (path, _) = split_target(&raw.target);
        let query = parse_query_params(&raw.target);
        let cookies = parse_cookies(&raw.headers);
        let declared_length = raw
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .or(raw.body.as_ref().map(|b| b.len() as u64));
        Self {
            request_id,
            method: raw.method,
            path: path.to_string(),
            query,
            headers: raw.headers,
            cookies,
            body: raw.body,
            declared_length,
            remote_addr: raw.remote_addr,
            form: None,
            path_params: ParamVec::new(),
            attributes: HashMap::new(),
            tmp_dir,
            error_handler,
            status: 200,
            content_type: None,
            response_headers: HeaderVec::new(),
            started: false,
            finished: false,
            error_sent: false,
            write_active: AtomicBool::new(false),
            cancel: CancelToken::new(),
            writer,
        }
    }

    // ---- request side -----------------------------------------------------

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameter by name, last occurrence wins for duplicates.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn query_params(&self) -> &ParamVec {
        &self.query
    }

    /// Header by name, case-insensitive per RFC 7230.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Path parameter bound by the router, last occurrence wins when the
    /// same name appears at multiple depths.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn path_params(&self) -> &ParamVec {
        &self.path_params
    }

    /// Bind path parameters extracted by the router. Happens exactly once,
    /// on the RECEIVED → ROUTED transition.
    pub fn bind_path_params(&mut self, params: ParamVec) {
        self.path_params = params;
    }

    /// Declared request body length, from Content-Length or the buffered
    /// body itself.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.declared_length
    }

    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Peer address, when the engine knows it.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<Value, HandlerError> {
        let bytes = self
            .body
            .as_deref()
            .ok_or_else(|| HandlerError::failure("request body is empty"))?;
        serde_json::from_slice(bytes)
            .map_err(|e| HandlerError::failure(format!("invalid JSON body: {e}")))
    }

    /// Form or multipart data, parsed lazily on first access. File parts of
    /// a multipart body are spooled into this application's temp directory.
    pub fn form(&mut self) -> Result<&FormData, HandlerError> {
        if self.form.is_none() {
            let content_type = self.header("content-type").unwrap_or("").to_string();
            let bytes = self.body.as_deref().unwrap_or(&[]);
            let parsed = parse_form(&content_type, bytes, &self.tmp_dir)?;
            self.form = Some(parsed);
        }
        // Populated just above.
        self.form
            .as_ref()
            .ok_or_else(|| HandlerError::failure("form parse state lost"))
    }

    /// Request-scoped attribute store, shared by every handler and callback
    /// that touches this request and by no other request.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    // ---- response side ----------------------------------------------------

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Set the response status. Dropped with a warning once the response
    /// has started.
    pub fn set_status(&mut self, status: u16) -> &mut Self {
        if self.started {
            warn!(
                request_id = %self.request_id,
                status = status,
                "status change dropped: response already started"
            );
            return self;
        }
        self.status = status;
        self
    }

    /// Set a response header. Dropped with a warning once the response has
    /// started.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        if self.started {
            warn!(
                request_id = %self.request_id,
                header = name,
                "header change dropped: response already started"
            );
            return self;
        }
        self.response_headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.response_headers
            .push((Arc::from(name), value.to_string()));
        self
    }

    /// Set the response content type. A charset is appended on flush for
    /// text and JSON types.
    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        if self.started {
            warn!(
                request_id = %self.request_id,
                content_type = content_type,
                "content type change dropped: response already started"
            );
            return self;
        }
        self.content_type = Some(content_type.to_string());
        self
    }

    #[must_use]
    pub fn response_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Cancellation signal for this request. Engines keep a clone and set it
    /// when the connection closes; in-flight handlers may poll it.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Send a JSON value. The first send flushes status and headers; later
    /// sends append body chunks in issue order (streaming case).
    pub fn send_value(&mut self, value: &Value) {
        if self.content_type.is_none() {
            self.content_type = Some("application/json".to_string());
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => self.write_chunk(&bytes),
            Err(e) => error!(request_id = %self.request_id, error = %e, "response serialization failed"),
        }
    }

    /// Send plain text with an explicit Content-Length.
    pub fn send_text(&mut self, text: &str) {
        if self.content_type.is_none() {
            self.content_type = Some("text/plain".to_string());
        }
        if !self.started {
            let len = text.len().to_string();
            self.set_header("Content-Length", &len);
        }
        self.write_chunk(text.as_bytes());
    }

    /// Send raw bytes with an explicit Content-Length.
    pub fn send_bytes(&mut self, bytes: &[u8]) {
        if self.content_type.is_none() {
            self.content_type = Some("application/octet-stream".to_string());
        }
        if !self.started {
            let len = bytes.len().to_string();
            self.set_header("Content-Length", &len);
        }
        self.write_chunk(bytes);
    }

    /// Send a bodyless response with the given status and finalize.
    pub fn send_status(&mut self, status: u16) {
        self.set_status(status);
        self.end();
    }

    /// Convert an error into a terminal response via this application's
    /// error-handler policy. Applied exactly once; once the response has
    /// started the error can only be logged.
    pub fn send_error(&mut self, err: &HandlerError) {
        if self.error_sent {
            debug!(request_id = %self.request_id, error = %err, "duplicate error send ignored");
            return;
        }
        self.error_sent = true;
        if self.started {
            warn!(
                request_id = %self.request_id,
                error = %err,
                "error after response start: headers already flushed, logging only"
            );
            return;
        }
        let handler = Arc::clone(&self.error_handler);
        handler.apply(self, err);
    }

    /// Finalize the exchange: flush the head if nothing was sent yet, then
    /// signal completion to the engine. Idempotent.
    pub fn end(&mut self) {
        if self.finished {
            return;
        }
        if self.cancel.is_cancelled() {
            debug!(request_id = %self.request_id, "finish dropped: request cancelled");
            self.finished = true;
            return;
        }
        if !self.enter_write() {
            return;
        }
        if !self.started {
            self.flush_head();
        }
        if let Err(e) = self.writer.finish() {
            warn!(request_id = %self.request_id, error = %e, "response finish failed");
        }
        self.finished = true;
        self.exit_write();
    }

    fn write_chunk(&mut self, chunk: &[u8]) {
        if self.finished {
            warn!(request_id = %self.request_id, "body write dropped: response already complete");
            return;
        }
        if self.cancel.is_cancelled() {
            debug!(request_id = %self.request_id, "body write dropped: request cancelled");
            return;
        }
        if !self.enter_write() {
            return;
        }
        if !self.started {
            self.flush_head();
        }
        if let Err(e) = self.writer.write_body(chunk) {
            warn!(request_id = %self.request_id, error = %e, "body write failed, cancelling request");
            self.cancel.cancel();
        }
        self.exit_write();
    }

    fn flush_head(&mut self) {
        let mut headers = self.response_headers.clone();
        if let Some(ct) = &self.content_type {
            let rendered = if ct.contains(';') {
                ct.clone()
            } else if ct.starts_with("text/") || ct == "application/json" {
                format!("{ct}; charset=utf-8")
            } else {
                ct.clone()
            };
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case("content-type"));
            headers.push((Arc::from("Content-Type"), rendered));
        }
        let reason = status_reason(self.status);
        if let Err(e) = self.writer.write_head(self.status, reason, &headers) {
            warn!(request_id = %self.request_id, error = %e, "head write failed, cancelling request");
            self.cancel.cancel();
        }
        self.started = true;
    }

    /// At-most-one-writer guard: a single atomic flag flipped on entry to
    /// every write operation. The framework never runs two threads against
    /// one Context, and this makes a violation loud instead of corrupting
    /// the response.
    fn enter_write(&self) -> bool {
        if self
            .write_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            error!(
                request_id = %self.request_id,
                "concurrent response write rejected: another writer is in flight"
            );
            return false;
        }
        true
    }

    fn exit_write(&self) {
        self.write_active.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("status", &self.status)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DefaultErrorHandler;

    fn test_context(method: Method, target: &str) -> (Context, SharedResponse) {
        let (writer, shared) = BufferedWriter::new();
        let raw = RawRequest::new(method, target);
        let ctx = Context::from_raw(
            raw,
            Box::new(writer),
            Arc::new(DefaultErrorHandler),
            std::env::temp_dir(),
            RequestId::new(),
        );
        (ctx, shared)
    }

    #[test]
    fn query_params_are_parsed_and_decoded() {
        let (ctx, _) = test_context(Method::GET, "/search?q=a%20b&limit=10");
        assert_eq!(ctx.query_param("q"), Some("a b"));
        assert_eq!(ctx.query_param("limit"), Some("10"));
        assert_eq!(ctx.path(), "/search");
    }

    #[test]
    fn headers_are_immutable_after_start() {
        let (mut ctx, shared) = test_context(Method::GET, "/");
        ctx.set_header("X-First", "1");
        ctx.send_text("hello");
        ctx.set_header("X-Late", "2");
        ctx.set_status(500);
        ctx.end();
        let rec = shared.snapshot();
        assert_eq!(rec.status, 200);
        assert_eq!(rec.header("X-First"), Some("1"));
        assert_eq!(rec.header("X-Late"), None);
        assert_eq!(rec.body_text(), "hello");
    }

    #[test]
    fn cancelled_request_drops_writes() {
        let (mut ctx, shared) = test_context(Method::GET, "/");
        ctx.cancel_token().cancel();
        ctx.send_text("too late");
        ctx.end();
        let rec = shared.snapshot();
        assert!(!rec.head_written);
        assert!(rec.body.is_empty());
    }

    #[test]
    fn error_send_is_exactly_once() {
        let (mut ctx, shared) = test_context(Method::GET, "/x");
        let err = HandlerError::failure("boom");
        ctx.send_error(&err);
        ctx.send_error(&err);
        let rec = shared.snapshot();
        assert_eq!(rec.status, 500);
        assert!(rec.finished);
        assert!(rec.body_text().contains("boom"));
    }

    #[test]
    fn streaming_sends_append_after_first_flush() {
        let (mut ctx, shared) = test_context(Method::GET, "/stream");
        ctx.send_value(&serde_json::json!("a"));
        ctx.send_value(&serde_json::json!("b"));
        ctx.end();
        let rec = shared.snapshot();
        assert_eq!(rec.status, 200);
        assert_eq!(rec.header("Content-Type"), Some("application/json; charset=utf-8"));
        assert_eq!(rec.body_text(), "\"a\"\"b\"");
        assert!(rec.finished);
    }
}
