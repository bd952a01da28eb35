use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        credentials::{
            hash_password, is_acceptable_password, is_valid_email, normalize_email,
            verify_password,
        },
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest},
        jwt::{AuthUser, JwtKeys},
        users::User,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn internal(context: &'static str) -> impl FnOnce(anyhow::Error) -> (StatusCode, String) {
    move |e| {
        error!(error = %e, "{context}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
    }
}

fn token_response(state: &AppState, user: User) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let pair = JwtKeys::from_ref(state)
        .issue_pair(user.id)
        .map_err(internal("jwt sign failed"))?;
    Ok(Json(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let email = normalize_email(&payload.email);

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    if !is_acceptable_password(&payload.password) {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    if User::find_by_email(&state.db, &email)
        .await
        .map_err(internal("find_by_email failed"))?
        .is_some()
    {
        warn!(email = %email, "email already registered");
        return Err((StatusCode::CONFLICT, "Email already registered".into()));
    }

    let hash = hash_password(&payload.password).map_err(internal("hash_password failed"))?;
    let user = User::create(&state.db, &email, &hash)
        .await
        .map_err(internal("create user failed"))?;

    info!(user_id = %user.id, "user registered");
    token_response(&state, user)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let email = normalize_email(&payload.email);

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    let Some(user) = User::find_by_email(&state.db, &email)
        .await
        .map_err(internal("find_by_email failed"))?
    else {
        warn!(email = %email, "login unknown email");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    };

    let ok = verify_password(&payload.password, &user.password_hash)
        .map_err(internal("verify_password failed"))?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }

    info!(user_id = %user.id, "user logged in");
    token_response(&state, user)
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let claims = JwtKeys::from_ref(&state)
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| {
            warn!(error = %e, "refresh rejected");
            (StatusCode::UNAUTHORIZED, "Invalid refresh token".to_string())
        })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await
        .map_err(internal("find_by_id failed"))?
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".to_string()))?;

    token_response(&state, user)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = User::find_by_id(&state.db, user_id)
        .await
        .map_err(internal("find_by_id failed"))?
        .ok_or_else(|| {
            error!(user_id = %user_id, "user not found");
            (StatusCode::UNAUTHORIZED, "User not found".to_string())
        })?;

    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_response_contains_verifiable_tokens() {
        let state = AppState::fake();
        let user = User {
            id: uuid::Uuid::new_v4(),
            email: "test@example.com".to_string(),
            password_hash: String::new(),
            created_at: time::OffsetDateTime::now_utc(),
        };
        let Json(resp) = token_response(&state, user.clone()).unwrap();
        assert_eq!(resp.user.id, user.id);
        let claims = JwtKeys::from_ref(&state).verify(&resp.access_token).unwrap();
        assert_eq!(claims.sub, user.id);
    }
}
