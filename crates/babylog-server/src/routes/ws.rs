use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::SharedAppState;
use crate::auth::AuthenticatedFamily;
use crate::session;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    auth: AuthenticatedFamily,
    State(state): State<SharedAppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_session(socket, state, auth))
}
