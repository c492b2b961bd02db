//! The sync server: auth gate, sync hub and per-connection session loop
//! that together keep every family's replicas converging, plus the
//! peripheral admin surface and HTTP bootstrap needed to run it.

mod auth;
mod error;
mod hub;
mod routes;
mod server;
mod session;

pub use self::error::{RequestError, RequestResult};
pub use self::server::{AppState, Opts, Server, ServerError, ServerResult, SharedAppState};

const LOG_TARGET: &str = "babylog::server";
