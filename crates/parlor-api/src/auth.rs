use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use anyhow::anyhow;
use tracing::{info, warn};
use uuid::Uuid;

use parlor_db::is_constraint_violation;
use parlor_gateway::blocking;
use parlor_types::Identity;
use parlor_types::api::{AuthResponse, LoginRequest, RegisterRequest};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::Json;

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const MIN_PASSWORD_LEN: usize = 8;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(ApiError::bad_request(format!(
            "username must be {} to {} characters",
            USERNAME_LEN.start(),
            USERNAME_LEN.end()
        )));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let email = req
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(ApiError::bad_request("email address is invalid"));
    }

    let db = state.db.clone();
    let (name, mail) = (username.clone(), email.clone());
    let (name_taken, email_taken) = blocking(move || {
        let name_taken = db.get_user_by_username(&name)?.is_some();
        let email_taken = match &mail {
            Some(mail) => db.get_user_by_email(mail)?.is_some(),
            None => false,
        };
        Ok((name_taken, email_taken))
    })
    .await?;

    if name_taken {
        return Err(ApiError::conflict("username is already taken"));
    }
    if email_taken {
        return Err(ApiError::conflict("email is already registered"));
    }

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let name = username.clone();
    let password = req.password;
    let inserted = blocking(move || {
        let hash = hash_password(&password)?;
        match db.create_user(&user_id.to_string(), &name, email.as_deref(), &hash) {
            Ok(()) => Ok(true),
            // lost a race with a concurrent registration
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    })
    .await?;
    if !inserted {
        return Err(ApiError::conflict("username or email is already registered"));
    }

    let identity = Identity::new(user_id, username);
    let token = state
        .gateway
        .verifier
        .issue(&identity)
        .map_err(ApiError::internal)?;

    info!("Registered {} ({})", identity.username, identity.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            username: identity.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let username = req.username.trim().to_string();
    let password = req.password;

    let user = blocking(move || {
        let Some(user) = db.get_user_by_username(&username)? else {
            return Ok(None);
        };
        Ok(verify_password(&password, &user.password).then_some(user))
    })
    .await?;

    let Some(user) = user else {
        warn!("Failed login for '{}'", req.username.trim());
        return Err(ApiError::unauthorized("invalid username or password"));
    };

    let identity = user.identity().map_err(ApiError::internal)?;
    let token = state
        .gateway
        .verifier
        .issue(&identity)
        .map_err(ApiError::internal)?;

    Ok(Json(AuthResponse {
        user_id: identity.id,
        username: identity.username,
        token,
    }))
}

/// Argon2id with a fresh salt.
fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// Accounts created without a password carry an unparseable hash and can
/// never log in.
fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
