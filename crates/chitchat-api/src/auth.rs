use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, info};

use chitchat_db::models::NewUser;
use chitchat_types::UserId;
use chitchat_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use chitchat_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Token signing material and lifetime, handed in from the server config.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// False for a wrong password and for a digest that does not parse.
pub fn verify_password(digest: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn issue_token(config: &AuthConfig, user_id: UserId, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + config.token_ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::Unauthenticated
    })
}

fn validate_registration(req: &RegisterRequest) -> ApiResult<()> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::invalid("username must be 3-32 characters"));
    }
    if !req.email.contains('@') {
        return Err(ApiError::invalid("email is invalid"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::invalid("password must be at least 8 characters"));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    validate_registration(&req)?;

    let username = req.username.clone();
    let email = req.email.clone();
    let (name_taken, email_taken) = state
        .store
        .blocking(move |db| {
            Ok((
                db.get_user_by_username(&username)?.is_some(),
                db.get_user_by_email(&email)?.is_some(),
            ))
        })
        .await?;
    if name_taken {
        return Err(ApiError::Conflict("username already taken".into()));
    }
    if email_taken {
        return Err(ApiError::Conflict("email already registered".into()));
    }

    let password_hash = hash_password(&req.password).map_err(ApiError::internal)?;

    let row = state
        .store
        .blocking(move |db| {
            let id = db.create_user(&NewUser {
                username: &req.username,
                email: &req.email,
                password_hash: &password_hash,
                first_name: &req.first_name,
                last_name: &req.last_name,
                date_of_birth: req.date_of_birth,
                profile_pic: &req.profile_pic,
            })?;
            db.get_user_by_id(id)?
                .ok_or_else(|| anyhow::anyhow!("User {} vanished after insert", id))
        })
        .await?;

    let user: User = row.into();
    let token = issue_token(&state.auth, user.id, &user.username).map_err(ApiError::internal)?;
    info!("Registered user {} ({})", user.username, user.id);

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let Json(req) = payload?;

    let email = req.email.clone();
    let row = state
        .store
        .blocking(move |db| db.get_user_by_email(&email))
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::Unauthenticated)?;

    if !verify_password(&row.password, &req.password) {
        return Err(ApiError::Unauthenticated);
    }

    let token = issue_token(&state.auth, row.id, &row.username).map_err(ApiError::internal)?;

    Ok(Json(AuthResponse {
        token,
        user: row.into(),
    }))
}
