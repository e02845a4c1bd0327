//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::BoundedListener)
//!     → server.rs   (Axum setup, request ID, limits, tracing)
//!     → request.rs  (RequestContext, phase tracking)
//!     → proxy.rs    (route → admit → select → lease → forward)
//!     → body.rs     (request body split into bounded chunks)
//!     → response.rs (response body streamed; lease released at end)
//!     → Send to client
//! ```

pub mod body;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{ForwardSettings, Gateway};
pub use request::{Phase, RequestContext, X_REQUEST_ID};
pub use server::HttpServer;
