//! HTTP surface: read-only status and connection views, bind/unbind and
//! auto-selection commands, and a push stream of status and catalog
//! changes. Everything here is a consumer of the engine's handles; nothing
//! in the engine depends on it.

pub mod server;

pub use server::{build_router, run_server, WebState};
