use axum::{extract::State, http::StatusCode, response::Json};
use axum_valid::Valid;
use chrono::{DateTime, Utc};
use compute::users::{find_user_by_email, register_user, NewUser};
use model::entities::{user, UserRole};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::{hash_password, issue_token, verify_password, AuthUser};
use crate::schemas::{api_error, compute_error, ApiError, ApiResponse, AppState, ErrorResponse};

/// Request body for registering a user
#[derive(Deserialize, Serialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    /// resident (default), manager or admin. Staff roles are refused with 403
    /// when the server runs with `ALLOW_STAFF_REGISTRATION=false`.
    #[schema(value_type = Option<String>, example = "resident")]
    pub role: Option<UserRole>,
    /// Required for residents
    pub apartment_number: Option<String>,
}

/// Request body for logging in
#[derive(Deserialize, Serialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// A user as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: i32,
    pub email: String,
    pub full_name: String,
    #[schema(value_type = String, example = "resident")]
    pub role: UserRole,
    pub apartment_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for UserResponse {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            apartment_number: user.apartment_number,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

/// Bearer token issued at login
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Token lifetime in seconds
    pub expires_in: i64,
    pub user: UserResponse,
}

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = ApiResponse<UserResponse>),
        (status = 400, description = "Invalid registration data", body = ErrorResponse),
        (status = 403, description = "Staff self-registration is disabled", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Valid(Json(payload)): Valid<Json<RegisterRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>), ApiError> {
    trace!("Entering register function");

    let role = payload.role.unwrap_or(UserRole::Resident);
    if role != UserRole::Resident && !state.settings.allow_staff_registration {
        debug!("Refused self-registration as {}", role);
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "Only residents may register themselves",
        ));
    }

    let hashed_password = hash_password(&payload.password)?;
    let new_user = NewUser {
        email: payload.email,
        hashed_password,
        full_name: payload.full_name,
        role,
        apartment_number: payload.apartment_number,
    };

    let user = register_user(&state.db, state.clock.as_ref(), new_user)
        .await
        .map_err(compute_error)?;

    info!("Registered user {} with role {}", user.id, user.role);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(UserResponse::from(user), "User registered successfully")),
    ))
}

/// Log in and receive a bearer token
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = ApiResponse<TokenResponse>),
        (status = 401, description = "Incorrect email or password", body = ErrorResponse),
        (status = 403, description = "Inactive user", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Valid(Json(payload)): Valid<Json<LoginRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<TokenResponse>>), ApiError> {
    trace!("Entering login function");

    let user = find_user_by_email(&state.db, &payload.email)
        .await
        .map_err(compute_error)?
        .filter(|user| verify_password(&payload.password, &user.hashed_password))
        .ok_or_else(|| {
            debug!("Login rejected");
            api_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Incorrect email or password",
            )
        })?;

    if !user.is_active {
        return Err(api_error(StatusCode::FORBIDDEN, "FORBIDDEN", "Inactive user"));
    }

    let access_token = issue_token(&state.settings, &user, state.clock.now())?;
    info!("User {} logged in", user.id);

    let response = TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: state.settings.jwt_expire_minutes * 60,
        user: UserResponse::from(user),
    };
    Ok((StatusCode::OK, Json(ApiResponse::ok(response, "Login successful"))))
}

/// Current user
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = ApiResponse<UserResponse>),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    )
)]
#[instrument]
pub async fn me(auth: AuthUser) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>), ApiError> {
    Ok((
        StatusCode::OK,
        Json(ApiResponse::ok(UserResponse::from(auth.0), "User retrieved successfully")),
    ))
}
