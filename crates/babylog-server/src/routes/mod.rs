mod admin;
mod healthz;
mod link;
mod ws;

use axum::Router;
use axum::routing::get;

use crate::SharedAppState;

pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz::healthz))
        .route("/ws", get(ws::upgrade))
        .route("/link/{token}", get(link::resolve_link))
        .merge(admin::router())
        .with_state(state)
}
