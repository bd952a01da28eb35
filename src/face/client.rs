use reqwest::StatusCode;
use tracing::{info, warn};

use super::{
    descriptor::FaceDescriptor,
    dto::{FaceDescriptorRequest, FaceLoginResponse, FaceStatusResponse},
    extractor::{DescriptorExtractor, ExtractError, FaceEmbedder, MediaDevices},
};

/// HTTP side of the face login flow.
#[derive(Clone)]
pub struct FaceLoginClient {
    http: reqwest::Client,
    base_url: String,
}

impl FaceLoginClient {
    /// `base_url` is the server root, e.g. `https://app.example`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn face_url(&self) -> String {
        format!("{}/api/auth/face", self.base_url)
    }

    pub async fn login(&self, descriptor: &FaceDescriptor) -> Result<FaceLoginResponse, ExtractError> {
        self.post_login(&FaceDescriptorRequest {
            face_descriptor: descriptor.as_slice().to_vec(),
        })
        .await
    }

    async fn post_login(&self, body: &FaceDescriptorRequest) -> Result<FaceLoginResponse, ExtractError> {
        let res = self
            .http
            .post(self.face_url())
            .json(body)
            .send()
            .await
            .map_err(request_error)?;
        read_json(res).await
    }

    /// Stores `descriptor` for the account behind `access_token`.
    pub async fn enroll(
        &self,
        access_token: &str,
        descriptor: &FaceDescriptor,
    ) -> Result<FaceStatusResponse, ExtractError> {
        let res = self
            .http
            .put(self.face_url())
            .bearer_auth(access_token)
            .json(&FaceDescriptorRequest {
                face_descriptor: descriptor.as_slice().to_vec(),
            })
            .send()
            .await
            .map_err(request_error)?;
        read_json(res).await
    }

    /// One login attempt: sample the camera, then submit the descriptor.
    /// A refusal from the server is recorded on the extractor.
    pub async fn login_with_camera<E, D>(
        &self,
        extractor: &mut DescriptorExtractor<E, D>,
    ) -> Result<FaceLoginResponse, ExtractError>
    where
        E: FaceEmbedder,
        D: MediaDevices,
    {
        let descriptor = extractor.capture().await?;
        match self.login(&descriptor).await {
            Ok(res) => {
                info!(user_id = %res.user.id, "face login accepted");
                Ok(res)
            }
            Err(e) => {
                extractor.record_failure(e.clone());
                Err(e)
            }
        }
    }
}

fn request_error(e: reqwest::Error) -> ExtractError {
    warn!(error = %e, "face login request failed");
    ExtractError::Request(e.to_string())
}

async fn read_json<T: serde::de::DeserializeOwned>(res: reqwest::Response) -> Result<T, ExtractError> {
    match res.status() {
        s if s.is_success() => res.json::<T>().await.map_err(request_error),
        StatusCode::UNAUTHORIZED => Err(ExtractError::Unauthorized),
        StatusCode::BAD_REQUEST => {
            let text = res.text().await.map_err(request_error)?;
            Err(ExtractError::Rejected(text))
        }
        s => Err(ExtractError::Request(format!("unexpected status {s}"))),
    }
}
