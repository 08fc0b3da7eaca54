//! An embeddable HTTP front-end for a directory tree of git
//! repositories: path-summary RPC browsing, raw blob and subtree-ZIP
//! downloads from virtual URLs, and smart-HTTP transport.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{Extension, Router};
use tower_layer::layer_fn;

use crate::layers::logger::LoggingMiddleware;

pub mod content;
pub mod framing;
pub mod git;
pub mod layers;
pub mod methods;
pub mod rpc;
pub mod subprocess;
pub mod vpath;

/// Process-scoped configuration and the assembled RPC namespace.
pub struct ServerState {
    /// Canonicalized directory beneath which all servable content lives.
    pub served_root: PathBuf,
    /// Docroot for `index.html`, `favicon.ico` and `/static/`.
    pub static_root: PathBuf,
    /// Optional decorative path segment; empty disables decoration.
    pub uri_marker: String,
    pub rpc: rpc::Dispatcher,
}

/// Assembles the application: one fallback dispatch service carrying
/// the whole route inventory, behind the logging middleware.
pub fn app(state: Arc<ServerState>) -> Router {
    Router::new()
        .fallback(methods::service)
        .layer(layer_fn(LoggingMiddleware))
        .layer(Extension(state))
}
