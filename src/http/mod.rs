//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace span, timeout)
//!     → request.rs (RequestContext: path, headers, cookies, client IP, principal)
//!     → routing::Redirector::resolve
//!     → response.rs (MatchResult → 301..308 / 410 / 404 with cache headers)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{build_context, MakeRequestUuid, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
