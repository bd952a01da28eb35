//! Client-side descriptor extraction.
//!
//! Face detection and embedding belong to an external library; this module
//! only orchestrates it. The camera stream is a scoped, single-owner
//! resource: it is acquired on [`DescriptorExtractor::mount`] and all of its
//! tracks are stopped when the extractor is unmounted or dropped, whatever
//! the outcome of the capture.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::descriptor::FaceDescriptor;

/// A single video frame, RGBA8.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("face detection models could not be loaded: {0}")]
    ModelLoadFailure(String),
    #[error("camera access denied")]
    CameraAccessDenied,
    #[error("camera stream is not ready")]
    StreamNotReady,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face embedding model produced an unusable descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("face not recognized")]
    Unauthorized,
    #[error("server rejected the descriptor: {0}")]
    Rejected(String),
    #[error("face login request failed: {0}")]
    Request(String),
}

impl ExtractError {
    /// Whether capturing again from the same mounted camera can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractError::StreamNotReady | ExtractError::NoFaceDetected | ExtractError::Request(_)
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ExtractError::ModelLoadFailure(_) => {
                "Face recognition could not be started. Please reload the page and try again."
            }
            ExtractError::CameraAccessDenied => {
                "Camera access was denied. Allow camera access in your browser settings."
            }
            ExtractError::StreamNotReady => "The camera is still starting. Please try again.",
            ExtractError::NoFaceDetected => {
                "No face detected. Center your face in the frame and try again."
            }
            ExtractError::InvalidDescriptor(_) => {
                "Face recognition failed. Please use another login method."
            }
            ExtractError::Unauthorized => {
                "Face not recognized. Please log in with your email and password."
            }
            ExtractError::Rejected(_) | ExtractError::Request(_) => {
                "Face login is unavailable right now. Please try again later."
            }
        }
    }
}

/// Adapter over the external face-embedding library.
#[async_trait]
pub trait FaceEmbedder: Send {
    /// Fetch detector and recognizer weights from `model_url`.
    async fn load_models(&mut self, model_url: &str) -> anyhow::Result<()>;
    /// Detect at most one face in `frame` and return its embedding.
    async fn detect_single(&mut self, frame: &Frame) -> anyhow::Result<Option<Vec<f32>>>;
}

/// Source of camera streams (the browser's media-capture API).
#[async_trait]
pub trait MediaDevices: Send {
    type Stream: MediaStream;

    /// Opens the user-facing camera. Permission refusal maps to
    /// [`ExtractError::CameraAccessDenied`].
    async fn open_camera(&mut self) -> Result<Self::Stream, ExtractError>;
}

pub trait MediaStream: Send {
    /// Current frame, `None` while the video element has nothing to show.
    fn current_frame(&self) -> Option<Frame>;
    fn stop_all_tracks(&mut self);
}

/// Owns a camera stream and stops all of its tracks on drop.
pub struct CameraGuard<S: MediaStream> {
    stream: Option<S>,
}

impl<S: MediaStream> CameraGuard<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn stream(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    /// Stops the tracks now. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_all_tracks();
            debug!("camera tracks stopped");
        }
    }
}

impl<S: MediaStream> Drop for CameraGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorState {
    Idle,
    LoadingModels,
    StreamStarting,
    Detecting,
    Succeeded,
    Failed(ExtractError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorEvent {
    Mount,
    ModelsLoaded,
    StreamStarted,
    DescriptorReady,
    Fail(ExtractError),
    Retry,
    Unmount,
}

impl ExtractorState {
    /// The state reached by applying `event`, or `None` if the transition
    /// is not allowed.
    pub fn next(&self, event: &ExtractorEvent) -> Option<ExtractorState> {
        use ExtractorEvent as E;
        use ExtractorState as S;

        match (self, event) {
            (_, E::Unmount) => Some(S::Idle),
            (S::Idle, E::Mount) => Some(S::LoadingModels),
            (S::LoadingModels, E::ModelsLoaded) => Some(S::StreamStarting),
            (S::StreamStarting, E::StreamStarted) => Some(S::Detecting),
            (S::Detecting, E::DescriptorReady) => Some(S::Succeeded),
            // A submitted descriptor can still be refused by the server.
            (S::LoadingModels | S::StreamStarting | S::Detecting | S::Succeeded, E::Fail(e)) => {
                Some(S::Failed(e.clone()))
            }
            (S::Failed(e), E::Retry) if e.is_retryable() => Some(S::Detecting),
            (S::Succeeded, E::Retry) => Some(S::Detecting),
            _ => None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        !matches!(self, ExtractorState::Idle)
    }
}

/// Orchestrates model loading, camera acquisition and single-frame
/// descriptor extraction.
pub struct DescriptorExtractor<E: FaceEmbedder, D: MediaDevices> {
    embedder: E,
    devices: D,
    model_url: String,
    camera: Option<CameraGuard<D::Stream>>,
    state: ExtractorState,
}

impl<E: FaceEmbedder, D: MediaDevices> DescriptorExtractor<E, D> {
    pub fn new(embedder: E, devices: D, model_url: impl Into<String>) -> Self {
        Self {
            embedder,
            devices,
            model_url: model_url.into(),
            camera: None,
            state: ExtractorState::Idle,
        }
    }

    pub fn state(&self) -> &ExtractorState {
        &self.state
    }

    fn apply(&mut self, event: ExtractorEvent) {
        match self.state.next(&event) {
            Some(next) => {
                debug!(from = ?self.state, to = ?next, "extractor transition");
                self.state = next;
            }
            None => warn!(state = ?self.state, event = ?event, "ignored extractor transition"),
        }
    }

    fn fail(&mut self, err: ExtractError) -> ExtractError {
        warn!(error = %err, retryable = err.is_retryable(), "face extraction failed");
        self.apply(ExtractorEvent::Fail(err.clone()));
        err
    }

    /// Loads the models and acquires the camera. Remounting releases the
    /// previous stream first.
    pub async fn mount(&mut self) -> Result<(), ExtractError> {
        if self.state.is_mounted() {
            self.unmount();
        }
        self.apply(ExtractorEvent::Mount);

        if let Err(e) = self.embedder.load_models(&self.model_url).await {
            return Err(self.fail(ExtractError::ModelLoadFailure(e.to_string())));
        }
        self.apply(ExtractorEvent::ModelsLoaded);

        let stream = match self.devices.open_camera().await {
            Ok(s) => s,
            Err(e) => return Err(self.fail(e)),
        };
        self.camera = Some(CameraGuard::new(stream));
        self.apply(ExtractorEvent::StreamStarted);
        info!(model_url = %self.model_url, "face extractor ready");
        Ok(())
    }

    /// Samples the current frame and extracts a descriptor from it.
    pub async fn capture(&mut self) -> Result<FaceDescriptor, ExtractError> {
        let retry = match &self.state {
            ExtractorState::Detecting => false,
            ExtractorState::Succeeded => true,
            ExtractorState::Failed(e) if e.is_retryable() => true,
            ExtractorState::Failed(e) => return Err(e.clone()),
            ExtractorState::Idle | ExtractorState::LoadingModels | ExtractorState::StreamStarting => {
                return Err(ExtractError::StreamNotReady)
            }
        };
        if retry {
            self.apply(ExtractorEvent::Retry);
        }

        let frame = self
            .camera
            .as_ref()
            .and_then(|c| c.stream())
            .and_then(|s| s.current_frame());
        let Some(frame) = frame else {
            return Err(self.fail(ExtractError::StreamNotReady));
        };

        let values = match self.embedder.detect_single(&frame).await {
            Ok(Some(values)) => values,
            Ok(None) => return Err(self.fail(ExtractError::NoFaceDetected)),
            Err(e) => {
                warn!(error = %e, "face detection error");
                return Err(self.fail(ExtractError::NoFaceDetected));
            }
        };

        match FaceDescriptor::new(values) {
            Ok(descriptor) => {
                self.apply(ExtractorEvent::DescriptorReady);
                Ok(descriptor)
            }
            Err(e) => Err(self.fail(ExtractError::InvalidDescriptor(e.to_string()))),
        }
    }

    /// Records a failure reported after the descriptor left the extractor.
    pub fn record_failure(&mut self, err: ExtractError) {
        self.fail(err);
    }

    /// Stops the camera and returns to `Idle`.
    pub fn unmount(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }
        self.apply(ExtractorEvent::Unmount);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    pub fn frame() -> Frame {
        Frame {
            width: 2,
            height: 2,
            pixels: vec![0; 16],
        }
    }

    pub struct MockStream {
        pub ready: bool,
        pub stops: Arc<AtomicUsize>,
    }

    impl MediaStream for MockStream {
        fn current_frame(&self) -> Option<Frame> {
            self.ready.then(frame)
        }

        fn stop_all_tracks(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub struct MockDevices {
        pub deny: bool,
        pub ready: bool,
        pub opened: Arc<AtomicUsize>,
        pub stops: Arc<AtomicUsize>,
    }

    impl MockDevices {
        pub fn new() -> Self {
            Self {
                deny: false,
                ready: true,
                opened: Arc::new(AtomicUsize::new(0)),
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl MediaDevices for MockDevices {
        type Stream = MockStream;

        async fn open_camera(&mut self) -> Result<MockStream, ExtractError> {
            if self.deny {
                return Err(ExtractError::CameraAccessDenied);
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(MockStream {
                ready: self.ready,
                stops: self.stops.clone(),
            })
        }
    }

    #[derive(Default)]
    pub struct MockEmbedder {
        pub fail_load: bool,
        pub detections: VecDeque<anyhow::Result<Option<Vec<f32>>>>,
    }

    impl MockEmbedder {
        pub fn returning(detections: Vec<Option<Vec<f32>>>) -> Self {
            Self {
                fail_load: false,
                detections: detections.into_iter().map(Ok).collect(),
            }
        }
    }

    #[async_trait]
    impl FaceEmbedder for MockEmbedder {
        async fn load_models(&mut self, model_url: &str) -> anyhow::Result<()> {
            if self.fail_load {
                anyhow::bail!("GET {model_url}: connection refused");
            }
            Ok(())
        }

        async fn detect_single(&mut self, _frame: &Frame) -> anyhow::Result<Option<Vec<f32>>> {
            self.detections.pop_front().unwrap_or(Ok(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::mock::*;
    use super::*;
    use crate::face::descriptor::DESCRIPTOR_LEN;

    const MODEL_URL: &str = "https://models.example/face";

    fn face() -> Option<Vec<f32>> {
        Some(vec![0.1; DESCRIPTOR_LEN])
    }

    #[tokio::test]
    async fn mount_capture_unmount_releases_camera() {
        let devices = MockDevices::new();
        let stops = devices.stops.clone();
        let mut ex = DescriptorExtractor::new(MockEmbedder::returning(vec![face()]), devices, MODEL_URL);

        ex.mount().await.unwrap();
        assert_eq!(ex.state(), &ExtractorState::Detecting);

        let d = ex.capture().await.unwrap();
        assert_eq!(d.as_slice().len(), DESCRIPTOR_LEN);
        assert_eq!(ex.state(), &ExtractorState::Succeeded);
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        ex.unmount();
        assert_eq!(ex.state(), &ExtractorState::Idle);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        ex.unmount();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_extractor_after_failure_stops_tracks() {
        let devices = MockDevices::new();
        let stops = devices.stops.clone();
        {
            let mut ex = DescriptorExtractor::new(MockEmbedder::returning(vec![None]), devices, MODEL_URL);
            ex.mount().await.unwrap();
            assert_eq!(ex.capture().await.unwrap_err(), ExtractError::NoFaceDetected);
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_face_is_retryable() {
        let mut ex = DescriptorExtractor::new(
            MockEmbedder::returning(vec![None, face()]),
            MockDevices::new(),
            MODEL_URL,
        );
        ex.mount().await.unwrap();

        let err = ex.capture().await.unwrap_err();
        assert_eq!(err, ExtractError::NoFaceDetected);
        assert!(err.is_retryable());
        assert_eq!(ex.state(), &ExtractorState::Failed(ExtractError::NoFaceDetected));

        assert!(ex.capture().await.is_ok());
        assert_eq!(ex.state(), &ExtractorState::Succeeded);
    }

    #[tokio::test]
    async fn stream_without_frames_is_not_ready() {
        let mut devices = MockDevices::new();
        devices.ready = false;
        let mut ex = DescriptorExtractor::new(MockEmbedder::returning(vec![face()]), devices, MODEL_URL);
        ex.mount().await.unwrap();
        assert_eq!(ex.capture().await.unwrap_err(), ExtractError::StreamNotReady);
    }

    #[tokio::test]
    async fn capture_before_mount_is_not_ready() {
        let mut ex = DescriptorExtractor::new(MockEmbedder::default(), MockDevices::new(), MODEL_URL);
        assert_eq!(ex.capture().await.unwrap_err(), ExtractError::StreamNotReady);
        assert_eq!(ex.state(), &ExtractorState::Idle);
    }

    #[tokio::test]
    async fn model_load_failure_is_terminal_and_never_opens_camera() {
        let devices = MockDevices::new();
        let opened = devices.opened.clone();
        let embedder = MockEmbedder {
            fail_load: true,
            ..Default::default()
        };
        let mut ex = DescriptorExtractor::new(embedder, devices, MODEL_URL);

        let err = ex.mount().await.unwrap_err();
        assert!(matches!(err, ExtractError::ModelLoadFailure(ref m) if m.contains("connection refused")));
        assert!(!err.is_retryable());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        assert_eq!(ex.capture().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn camera_denied_surfaces_as_failure() {
        let mut devices = MockDevices::new();
        devices.deny = true;
        let mut ex = DescriptorExtractor::new(MockEmbedder::default(), devices, MODEL_URL);
        assert_eq!(ex.mount().await.unwrap_err(), ExtractError::CameraAccessDenied);
        assert_eq!(ex.state(), &ExtractorState::Failed(ExtractError::CameraAccessDenied));
    }

    #[tokio::test]
    async fn wrong_length_embedding_is_rejected() {
        let mut ex = DescriptorExtractor::new(
            MockEmbedder::returning(vec![Some(vec![0.1; 64])]),
            MockDevices::new(),
            MODEL_URL,
        );
        ex.mount().await.unwrap();
        let err = ex.capture().await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidDescriptor(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn detection_error_counts_as_no_face() {
        let embedder = MockEmbedder {
            fail_load: false,
            detections: std::collections::VecDeque::from(vec![Err(anyhow::anyhow!("backend crashed"))]),
        };
        let mut ex = DescriptorExtractor::new(embedder, MockDevices::new(), MODEL_URL);
        ex.mount().await.unwrap();
        assert_eq!(ex.capture().await.unwrap_err(), ExtractError::NoFaceDetected);
    }

    #[tokio::test]
    async fn remount_releases_previous_stream() {
        let devices = MockDevices::new();
        let (opened, stops) = (devices.opened.clone(), devices.stops.clone());
        let mut ex = DescriptorExtractor::new(MockEmbedder::default(), devices, MODEL_URL);
        ex.mount().await.unwrap();
        ex.mount().await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        use ExtractorEvent as E;
        use ExtractorState as S;

        assert_eq!(S::Idle.next(&E::Mount), Some(S::LoadingModels));
        assert_eq!(S::LoadingModels.next(&E::ModelsLoaded), Some(S::StreamStarting));
        assert_eq!(S::StreamStarting.next(&E::StreamStarted), Some(S::Detecting));
        assert_eq!(S::Detecting.next(&E::DescriptorReady), Some(S::Succeeded));
        assert_eq!(
            S::Succeeded.next(&E::Fail(ExtractError::Unauthorized)),
            Some(S::Failed(ExtractError::Unauthorized))
        );
        assert_eq!(S::Failed(ExtractError::StreamNotReady).next(&E::Retry), Some(S::Detecting));
        assert_eq!(S::Failed(ExtractError::CameraAccessDenied).next(&E::Retry), None);
        assert_eq!(
            S::Failed(ExtractError::Request("timeout".into())).next(&E::Retry),
            Some(S::Detecting)
        );
        assert_eq!(S::Failed(ExtractError::Unauthorized).next(&E::Retry), None);
        assert_eq!(S::Idle.next(&E::DescriptorReady), None);
        assert_eq!(S::Idle.next(&E::Fail(ExtractError::NoFaceDetected)), None);
        assert_eq!(S::Detecting.next(&E::Unmount), Some(S::Idle));
    }

    #[test]
    fn every_error_has_a_user_message() {
        for e in [
            ExtractError::ModelLoadFailure("x".into()),
            ExtractError::CameraAccessDenied,
            ExtractError::StreamNotReady,
            ExtractError::NoFaceDetected,
            ExtractError::InvalidDescriptor("x".into()),
            ExtractError::Unauthorized,
            ExtractError::Rejected("x".into()),
            ExtractError::Request("x".into()),
        ] {
            assert!(!e.user_message().is_empty());
        }
    }
}
