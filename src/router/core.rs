use crate::dispatch::{ExecutionMode, Handler};
use crate::error::PatternError;
use http::Method;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Maximum number of path/query parameters before heap allocation.
/// Most REST routes bind well under 8 parameters.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Parameter names use `Arc<str>` because they come from the static route
/// table and `Arc::clone()` is an O(1) atomic increment; values stay `String`
/// as per-request data extracted from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// One segment of a compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches exactly this text.
    Literal(String),
    /// Matches one non-empty segment and binds it under this name.
    Param(Arc<str>),
    /// Matches the remaining path. Always the final segment.
    Wildcard,
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern string. Rejects patterns without a leading `/`,
    /// empty or unclosed `{name}` segments, and wildcards that are not last.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash {
                pattern: pattern.to_string(),
            });
        }
        let mut segments = Vec::new();
        let raw_segments: Vec<&str> = if pattern == "/" {
            Vec::new()
        } else {
            pattern[1..].split('/').collect()
        };
        for (i, seg) in raw_segments.iter().enumerate() {
            let last = i + 1 == raw_segments.len();
            if *seg == "*" {
                if !last {
                    return Err(PatternError::WildcardNotLast {
                        pattern: pattern.to_string(),
                    });
                }
                segments.push(Segment::Wildcard);
            } else if seg.starts_with('{') {
                let name = seg
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .filter(|n| !n.is_empty() && !n.contains('{') && !n.contains('}'));
                match name {
                    Some(name) => segments.push(Segment::Param(Arc::from(name))),
                    None => {
                        return Err(PatternError::InvalidParam {
                            segment: (*seg).to_string(),
                        })
                    }
                }
            } else if seg.contains('{') || seg.contains('}') {
                return Err(PatternError::InvalidParam {
                    segment: (*seg).to_string(),
                });
            } else {
                segments.push(Segment::Literal((*seg).to_string()));
            }
        }
        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a request path against this pattern, binding parameters.
    ///
    /// Bound values are percent-decoded. A trailing wildcard binds the
    /// remaining path (without its leading `/`, possibly empty) under `*`.
    #[must_use]
    pub fn capture(&self, path: &str) -> Option<ParamVec> {
        let path = path.strip_prefix('/')?;
        let mut params = ParamVec::new();
        let mut remaining = path;
        for (i, segment) in self.segments.iter().enumerate() {
            if let Segment::Wildcard = segment {
                params.push((Arc::from("*"), decode_segment(remaining)));
                return Some(params);
            }
            let (head, tail) = match remaining.split_once('/') {
                Some((h, t)) => (h, t),
                None => {
                    // Last path segment; the pattern must also be on its last.
                    if i + 1 != self.segments.len() {
                        return None;
                    }
                    (remaining, "")
                }
            };
            match segment {
                Segment::Literal(lit) => {
                    if head != lit {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if head.is_empty() {
                        return None;
                    }
                    params.push((Arc::clone(name), decode_segment(head)));
                }
                Segment::Wildcard => unreachable!("wildcard handled above"),
            }
            remaining = tail;
        }
        // Every pattern segment consumed; the path must be exhausted too.
        if remaining.is_empty() {
            Some(params)
        } else {
            None
        }
    }
}

fn decode_segment(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// One registered route: a method, a compiled pattern, a handler, and
/// per-route metadata read by the execution controller.
pub struct Route {
    pub method: Method,
    pub pattern: PathPattern,
    pub handler: Arc<dyn Handler>,
    pub attributes: HashMap<String, Value>,
    pub execution: ExecutionMode,
}

impl Route {
    pub fn new(
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<Self, PatternError> {
        Ok(Self {
            method,
            pattern: PathPattern::parse(pattern)?,
            handler: Arc::new(handler),
            attributes: HashMap::new(),
            execution: ExecutionMode::default(),
        })
    }

    /// Run this route's handler on the shared worker pool instead of inline.
    #[must_use]
    pub fn with_execution(mut self, mode: ExecutionMode) -> Self {
        self.execution = mode;
        self
    }

    /// Attach static metadata readable by handlers and middleware.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

/// Result of successfully matching a request to a route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route (Arc to avoid expensive clones).
    pub route: Arc<Route>,
    /// Path parameters bound by the pattern, percent-decoded.
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Path parameter by name, last occurrence wins when the same name
    /// appears at multiple depths.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Ordered route table for one application.
///
/// Matching walks the table in registration order and the first route whose
/// method and pattern both match wins. Registration order is the only
/// precedence rule; register specific routes before general ones.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route to the table.
    pub fn add(&mut self, route: Route) {
        info!(
            method = %route.method,
            pattern = %route.pattern.as_str(),
            execution = ?route.execution,
            position = self.routes.len(),
            "route registered"
        );
        self.routes.push(Arc::new(route));
    }

    /// Match a request against the table.
    #[must_use]
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if route.method != *method {
                continue;
            }
            if let Some(path_params) = route.pattern.capture(path) {
                debug!(
                    method = %method,
                    path = %path,
                    pattern = %route.pattern.as_str(),
                    "route matched"
                );
                return Some(RouteMatch {
                    route: Arc::clone(route),
                    path_params,
                });
            }
        }
        // Multi-app dispatch probes every mounted router, so a miss here is
        // routine and only worth debug level.
        debug!(method = %method, path = %path, "no route matched");
        None
    }

    /// Methods under which this path would match, for the Allow header of a
    /// 405 response. Empty when the path matches nothing at all.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods = Vec::new();
        for route in &self.routes {
            if route.pattern.capture(path).is_some() && !methods.contains(&route.method) {
                methods.push(route.method.clone());
            }
        }
        methods
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
