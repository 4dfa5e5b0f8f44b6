//! # Manifold
//!
//! **Manifold** is a coroutine-powered routing and request/response core for
//! embedding HTTP applications behind interchangeable server engines, built
//! on the `may` runtime.
//!
//! ## Overview
//!
//! Manifold owns everything between a decoded HTTP request and a finished
//! response: route matching, per-request Context lifecycle, inline and
//! worker-pool handler execution, detached (async-completion) responses,
//! value streaming, and static asset resolution. Engines stay thin: they
//! decode their native request into a [`RawRequest`](server::RawRequest),
//! supply a [`ResponseWriter`](context::ResponseWriter) for the connection,
//! and call one [`HttpHandler`](server::HttpHandler).
//!
//! ## Architecture
//!
//! - **[`router`]** - segment-based path matching with registration-order
//!   precedence
//! - **[`context`]** - the per-request facade over request data and response
//!   writing
//! - **[`dispatch`]** - the execution controller, handler contract, and
//!   shared worker pool
//! - **[`stream`]** - bridging asynchronous value producers into response
//!   bodies
//! - **[`app`]** - applications and first-match multi-app dispatch
//! - **[`assets`]** - packaged, directory, and webjar asset sources
//! - **[`server`]** - the engine adapter seam
//! - **[`error`]** - error taxonomy and per-application error policy
//!
//! ## Example
//!
//! ```rust
//! use manifold::app::{Application, MultiAppDispatcher};
//! use manifold::context::{BufferedWriter, Context};
//! use manifold::dispatch::HandlerResult;
//! use manifold::router::Route;
//! use manifold::runtime_config::RuntimeConfig;
//! use manifold::server::{HttpHandler, RawRequest};
//! use http::Method;
//!
//! let app = Application::new("api").route(
//!     Route::new(Method::GET, "/hello/{name}", |ctx: &mut Context| {
//!         let name = ctx.path_param("name").unwrap_or("world").to_string();
//!         ctx.send_text(&format!("hello {name}"));
//!         HandlerResult::Done
//!     })
//!     .unwrap(),
//! );
//!
//! let mut dispatcher = MultiAppDispatcher::new(RuntimeConfig::default());
//! dispatcher.mount(app);
//!
//! let (writer, response) = BufferedWriter::new();
//! dispatcher.handle(RawRequest::new(Method::GET, "/hello/may"), Box::new(writer));
//! assert_eq!(response.snapshot().body_text(), "hello may");
//! ```

pub mod app;
pub mod assets;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod stream;

pub use app::{Application, MultiAppDispatcher};
pub use assets::{Asset, AssetSource, EmbeddedResources, ResourceLoader};
pub use context::{BufferedWriter, CancelToken, Context, ResponseWriter};
pub use dispatch::{ExecutionController, ExecutionMode, Handler, HandlerResult, ResponsePayload};
pub use error::{AssetError, DefaultErrorHandler, ErrorHandler, HandlerError, PatternError};
pub use ids::RequestId;
pub use router::{PathPattern, Route, RouteMatch, Router};
pub use runtime_config::RuntimeConfig;
pub use server::{HttpHandler, RawRequest};
pub use stream::{StreamEvent, Subscriber};
