use crate::context::HeaderVec;
use crate::router::ParamVec;
use http::Method;
use std::sync::Arc;
use tracing::debug;

/// Engine-neutral view of one parsed inbound request.
///
/// Each engine binding decodes its native request type into this shape before
/// handing it to an [`HttpHandler`](super::HttpHandler). The core never
/// touches engine connection types.
#[derive(Debug)]
pub struct RawRequest {
    /// HTTP method.
    pub method: Method,
    /// Request target as received, path plus optional query string.
    pub target: String,
    /// Request headers in arrival order.
    pub headers: HeaderVec,
    /// Fully buffered request body, when one was sent.
    pub body: Option<Vec<u8>>,
    /// Peer address, when the engine knows it.
    pub remote_addr: Option<String>,
}

impl RawRequest {
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderVec::new(),
            body: None,
            remote_addr: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((Arc::from(name), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Header by name, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request path with any query string removed.
    #[must_use]
    pub fn path(&self) -> &str {
        split_target(&self.target).0
    }
}

/// Split a request target into path and optional query string.
#[must_use]
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Parse the query string of a request target, URL-decoding names and values.
/// Duplicate names are kept in arrival order.
#[must_use]
pub fn parse_query_params(target: &str) -> ParamVec {
    let Some(query) = split_target(target).1 else {
        return ParamVec::new();
    };
    let params: ParamVec = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (Arc::from(k.as_ref()), v.into_owned()))
        .collect();
    debug!(param_count = params.len(), "query params parsed");
    params
}

/// Extract cookies from a `Cookie` header, if present.
#[must_use]
pub fn parse_cookies(headers: &HeaderVec) -> HeaderVec {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
        .map(|(_, raw)| {
            raw.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((Arc::from(name), value))
                })
                .collect()
        })
        .unwrap_or_default()
}
