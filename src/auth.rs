//! Password hashing, bearer tokens and the authenticated-caller extractor.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use compute::{users::find_active_user, Caller, ComputeError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use model::entities::user;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

use crate::config::Settings;
use crate::schemas::{api_error, compute_error, ApiError, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

fn unauthorized(message: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Failed to hash password",
            )
        })
}

/// `false` for a wrong password and for a malformed stored hash alike.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

/// Signs an HS256 token for `user`, valid for `jwt_expire_minutes` from `now`.
pub fn issue_token(settings: &Settings, user: &user::Model, now: DateTime<Utc>) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(settings.jwt_expire_minutes)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Token encoding failed: {}", e);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Failed to issue token",
        )
    })
}

/// Checks signature and expiry. Expiry is measured against the injected
/// clock rather than the system time.
pub fn decode_token(settings: &Settings, token: &str, now: DateTime<Utc>) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        unauthorized("Could not validate credentials")
    })?
    .claims;

    if claims.exp <= now.timestamp() {
        return Err(unauthorized("Token has expired"));
    }
    Ok(claims)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// The active user behind the request's bearer token.
pub struct AuthUser(pub user::Model);

impl AuthUser {
    pub fn caller(&self) -> Caller {
        Caller::new(self.0.id, self.0.role)
    }
}

impl fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthUser")
            .field("id", &self.0.id)
            .field("role", &self.0.role)
            .finish()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| unauthorized("Not authenticated"))?;
        let claims = decode_token(&state.settings, token, state.clock.now())?;
        let user_id: i32 = claims
            .sub
            .parse()
            .map_err(|_| unauthorized("Could not validate credentials"))?;

        let user = find_active_user(&state.db, user_id)
            .await
            .map_err(|e| match e {
                ComputeError::NotFound(_) => unauthorized("Could not validate credentials"),
                other => compute_error(other),
            })?;

        Ok(AuthUser(user))
    }
}
