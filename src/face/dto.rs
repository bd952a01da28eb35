use serde::{Deserialize, Serialize};

use crate::auth::dto::PublicUser;

/// Body of `POST /api/auth/face` and `PUT /api/auth/face`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDescriptorRequest {
    pub face_descriptor: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FaceLoginResponse {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceStatusResponse {
    pub enrolled: bool,
}
