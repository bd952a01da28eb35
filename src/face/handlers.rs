use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    descriptor::FaceDescriptor,
    dto::{FaceDescriptorRequest, FaceLoginResponse, FaceStatusResponse},
    error::FaceError,
    matcher::find_best_match,
};
use crate::{
    auth::{
        dto::PublicUser,
        jwt::{AuthUser, JwtKeys},
    },
    state::AppState,
};

pub fn face_routes() -> Router<AppState> {
    Router::new().route(
        "/auth/face",
        post(face_login)
            .put(enroll_face)
            .get(face_status)
            .delete(remove_face),
    )
}

/// Validates the body before anything touches the gallery.
fn parse_descriptor(
    body: Result<Json<FaceDescriptorRequest>, JsonRejection>,
) -> Result<FaceDescriptor, FaceError> {
    let Json(body) = body.map_err(|e| {
        warn!(error = %e, "malformed face descriptor body");
        FaceError::MalformedBody(e.body_text())
    })?;
    FaceDescriptor::new(body.face_descriptor).map_err(|e| {
        warn!(error = %e, "invalid face descriptor");
        e
    })
}

#[instrument(skip(state, body))]
pub async fn face_login(
    State(state): State<AppState>,
    body: Result<Json<FaceDescriptorRequest>, JsonRejection>,
) -> Result<Json<FaceLoginResponse>, FaceError> {
    let probe = parse_descriptor(body)?;
    let gallery = state.faces.gallery().await?;
    let result = find_best_match(&probe, &gallery, state.config.face.match_threshold);

    let Some(record) = result.matched else {
        warn!(
            candidates = gallery.len(),
            distance = ?result.distance,
            threshold = result.threshold,
            "face login rejected"
        );
        return Err(FaceError::Unauthorized);
    };

    let pair = JwtKeys::from_ref(&state).issue_pair(record.user_id)?;

    info!(
        user_id = %record.user_id,
        distance = ?result.distance,
        threshold = result.threshold,
        "face login succeeded"
    );
    Ok(Json(FaceLoginResponse {
        success: true,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user: PublicUser {
            id: record.user_id,
            email: record.email.clone(),
        },
    }))
}

#[instrument(skip(state, body))]
pub async fn enroll_face(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<FaceDescriptorRequest>, JsonRejection>,
) -> Result<Json<FaceStatusResponse>, FaceError> {
    let descriptor = parse_descriptor(body)?;
    if let Err(e) = state.faces.upsert(user_id, &descriptor).await {
        warn!(%user_id, error = %e, "face enrollment failed");
        return Err(e.into());
    }
    info!(%user_id, "face descriptor enrolled");
    Ok(Json(FaceStatusResponse { enrolled: true }))
}

#[instrument(skip(state))]
pub async fn face_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<FaceStatusResponse>, FaceError> {
    let enrolled = state.faces.is_enrolled(user_id).await?;
    Ok(Json(FaceStatusResponse { enrolled }))
}

#[instrument(skip(state))]
pub async fn remove_face(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, FaceError> {
    if state.faces.remove(user_id).await? {
        info!(%user_id, "face descriptor removed");
    }
    Ok(StatusCode::NO_CONTENT)
}
