//! The access-link redirect: turns an opaque token carried in a URL path
//! into a long-lived cookie, the way the teacher's unlock flow turns a
//! one-time secret into a session cookie.

use std::str::FromStr as _;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect};
use babylog_core::AccessTokenValue;
use tower_cookies::{Cookie, Cookies};

use crate::SharedAppState;
use crate::auth::TOKEN_COOKIE;
use crate::error::{RequestError, RequestResult};

pub async fn resolve_link(
    State(state): State<SharedAppState>,
    cookies: Cookies,
    Path(token): Path<String>,
) -> RequestResult<impl IntoResponse> {
    let token = AccessTokenValue::from_str(&token).map_err(|_| RequestError::Unauthorized)?;
    let resolved = state
        .db
        .resolve_token(token)
        .await?
        .ok_or(RequestError::Unauthorized)?;

    let mut cookie = Cookie::new(TOKEN_COOKIE, resolved.token.to_string());
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::weeks(52));
    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookies.add(cookie);

    Ok(Redirect::to(&format!("/?family_id={}", resolved.family_id)))
}
