use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use tracing::info;

use chitchat_db::models::ProfileUpdate;
use chitchat_types::api::{Claims, EmailQuery, StatusResponse, UpdateProfileRequest};
use chitchat_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<User>> {
    let row = state
        .store
        .active_user(claims.sub)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(row.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<Json<User>> {
    let Json(req) = payload?;
    if let Some(email) = &req.email {
        if !email.contains('@') {
            return Err(ApiError::invalid("email is invalid"));
        }
    }

    state
        .store
        .active_user(claims.sub)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    let id = claims.sub;
    let (email_taken, row) = state
        .store
        .blocking(move |db| {
            if let Some(email) = &req.email {
                if db.get_user_by_email(email)?.is_some_and(|u| u.id != id) {
                    return Ok((true, None));
                }
            }
            db.update_profile(
                id,
                &ProfileUpdate {
                    first_name: req.first_name.as_deref(),
                    last_name: req.last_name.as_deref(),
                    email: req.email.as_deref(),
                    profile_pic: req.profile_pic.as_deref(),
                },
            )?;
            Ok((false, db.get_user_by_id(id)?))
        })
        .await?;

    if email_taken {
        return Err(ApiError::Conflict("email already registered".into()));
    }
    let row = row.ok_or(ApiError::NotFound("User"))?;
    Ok(Json(row.into()))
}

/// Deactivate the caller's account and drop its live connection.
pub async fn delete_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<StatusResponse>> {
    let id = claims.sub;
    if !state.store.blocking(move |db| db.deactivate_user(id)).await? {
        return Err(ApiError::NotFound("User"));
    }

    if let Some(handle) = state.registry.lookup(id).await {
        state.registry.unregister(id, handle.conn_id()).await;
    }
    info!("Deactivated user {} ({})", claims.username, id);

    Ok(Json(StatusResponse {
        message: "Account deactivated".into(),
    }))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    let rows = state.store.blocking(|db| db.list_users()).await?;
    Ok(Json(rows.into_iter().map(User::from).collect()))
}

pub async fn get_user_by_username(
    State(state): State<AppState>,
    username: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<User>> {
    let Path(username) = username?;
    let row = state
        .store
        .blocking(move |db| db.get_user_by_username(&username))
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(row.into()))
}

/// `GET /users/by-email?email=`
pub async fn get_user_by_email(
    State(state): State<AppState>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> ApiResult<Json<User>> {
    let Query(q) = query?;
    let email = q.email.trim().to_string();
    if email.is_empty() {
        return Err(ApiError::invalid("email query parameter is required"));
    }

    let row = state
        .store
        .blocking(move |db| db.get_user_by_email(&email))
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(row.into()))
}
