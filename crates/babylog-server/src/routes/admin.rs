//! The operator surface: a handful of JSON routes covering family and
//! access-token CRUD, protected by the startup-configured admin bearer
//! token rather than a per-family access link. Peripheral to the sync
//! engine, but needed so the core has some way to be exercised at all.

use axum::Router;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use babylog_core::{AccessTokenValue, Family, FamilyId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::SharedAppState;
use crate::auth::AdminAuth;
use crate::error::RequestResult;

pub fn router() -> Router<SharedAppState> {
    Router::new()
        .route("/admin/families", post(create_family).get(list_families))
        .route("/admin/families/{family_id}", get(get_family))
        .route("/admin/families/{family_id}/rename", post(rename_family))
        .route("/admin/families/{family_id}/archive", post(archive_family))
        .route(
            "/admin/families/{family_id}/tokens",
            post(issue_token).get(list_tokens),
        )
        .route("/admin/tokens/{token}/revoke", post(revoke_token))
}

#[derive(Debug, Deserialize)]
struct CreateFamilyRequest {
    name: String,
    #[serde(default)]
    notes: String,
}

async fn create_family(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
    axum::Json(req): axum::Json<CreateFamilyRequest>,
) -> RequestResult<impl IntoResponse> {
    let family = state.db.create_family(req.name, req.notes).await?;
    Ok(axum::Json(family))
}

async fn list_families(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
) -> RequestResult<impl IntoResponse> {
    let families = state.db.list_families().await?;
    Ok(axum::Json(families))
}

async fn get_family(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
    Path(family_id): Path<FamilyId>,
) -> RequestResult<axum::Json<Family>> {
    let family = state
        .db
        .get_family(family_id)
        .await?
        .ok_or(crate::error::RequestError::NotFound)?;
    Ok(axum::Json(family))
}

#[derive(Debug, Deserialize)]
struct RenameFamilyRequest {
    name: String,
    #[serde(default)]
    notes: String,
}

async fn rename_family(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
    Path(family_id): Path<FamilyId>,
    axum::Json(req): axum::Json<RenameFamilyRequest>,
) -> RequestResult<impl IntoResponse> {
    let family = state.db.rename_family(family_id, req.name, req.notes).await?;
    Ok(axum::Json(family))
}

#[derive(Debug, Deserialize)]
struct ArchiveFamilyRequest {
    archived: bool,
}

async fn archive_family(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
    Path(family_id): Path<FamilyId>,
    axum::Json(req): axum::Json<ArchiveFamilyRequest>,
) -> RequestResult<impl IntoResponse> {
    let family = state
        .db
        .set_family_archived(family_id, req.archived)
        .await?;
    Ok(axum::Json(family))
}

#[derive(Debug, Deserialize)]
struct IssueTokenRequest {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    expires_at: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
struct IssuedToken {
    token: AccessTokenValue,
    family_id: FamilyId,
    label: Option<String>,
    expires_at: Option<Timestamp>,
}

async fn issue_token(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
    Path(family_id): Path<FamilyId>,
    axum::Json(req): axum::Json<IssueTokenRequest>,
) -> RequestResult<impl IntoResponse> {
    let token = state
        .db
        .issue_token(family_id, req.label, req.expires_at)
        .await?;
    Ok(axum::Json(IssuedToken {
        token: token.token,
        family_id: token.family_id,
        label: token.label,
        expires_at: token.expires_at,
    }))
}

async fn list_tokens(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
    Path(family_id): Path<FamilyId>,
) -> RequestResult<impl IntoResponse> {
    let tokens = state.db.list_tokens(family_id).await?;
    Ok(axum::Json(tokens))
}

async fn revoke_token(
    _admin: AdminAuth,
    State(state): State<SharedAppState>,
    Path(token): Path<String>,
) -> RequestResult<impl IntoResponse> {
    let token = token
        .parse::<AccessTokenValue>()
        .map_err(|_| crate::error::RequestError::NotFound)?;
    state.db.revoke_token(token).await?;
    Ok(axum::Json(serde_json::json!({ "revoked": true })))
}
