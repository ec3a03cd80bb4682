use crate::config::Config;
use faceid_core::{
    DirectoryGallery, GallerySource, InFlight, InFlightGuard, ModelError, OnnxSiameseModel,
    SimilarityModel, VerificationResult, Verifier, VerifyError,
};
use faceid_hw::{Camera, CaptureError, Frame, FrameSource};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CaptureError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the front end to the engine thread.
enum EngineRequest {
    Preview {
        reply: oneshot::Sender<Option<Frame>>,
    },
    Verify {
        guard: InFlightGuard,
        reply: oneshot::Sender<Result<VerificationResult, VerifyError>>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    in_flight: InFlight,
}

impl EngineHandle {
    /// Grab one frame cropped to the capture region.
    ///
    /// `None` means the camera failed this tick; the caller skips it.
    pub async fn preview(&self) -> Result<Option<Frame>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Preview { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Run one verification. Fails with `Busy` while another is in flight.
    pub async fn verify(&self) -> Result<VerificationResult, EngineError> {
        let guard = self.in_flight.try_acquire().ok_or(VerifyError::Busy)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                guard,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_busy()
    }
}

/// Owns the engine thread (and through it the camera and model) from
/// startup until [`Session::close`].
pub struct Session {
    handle: EngineHandle,
    thread: JoinHandle<()>,
}

impl Session {
    /// Open the camera, load the model, and start the engine.
    ///
    /// Fails fast if either resource is unavailable.
    pub fn open(config: &Config) -> Result<Self, EngineError> {
        let camera = open_camera(config)?;
        tracing::info!(
            device = %camera.device_path,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );

        let model = OnnxSiameseModel::load(&config.model_path, config.model_layout)?;
        tracing::info!(path = %config.model_path.display(), "similarity model loaded");

        let verifier = Verifier::new(model, config.thresholds, config.geometry)
            .with_capture_path(config.input_image_path());
        let gallery = DirectoryGallery::new(config.gallery_dir());
        tracing::info!(dir = %gallery.dir().display(), "using reference gallery");

        Self::start(camera, verifier, gallery, config.warmup_frames)
    }

    /// Start the engine over already opened resources.
    pub fn start<S, M, G>(
        mut source: S,
        mut verifier: Verifier<M>,
        gallery: G,
        warmup_frames: usize,
    ) -> Result<Self, EngineError>
    where
        S: FrameSource + Send + 'static,
        M: SimilarityModel + Send + 'static,
        G: GallerySource + Send + 'static,
    {
        // Let the camera's exposure settle before the first real frame.
        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                let _ = source.read_frame();
            }
        }

        let in_flight = verifier.in_flight();
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

        let thread = std::thread::Builder::new()
            .name("faceid-engine".into())
            .spawn(move || {
                tracing::info!("engine thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        EngineRequest::Preview { reply } => {
                            let _ = reply.send(run_preview(&mut source, &verifier));
                        }
                        EngineRequest::Verify { guard, reply } => {
                            let result = verifier.verify_held(&guard, &mut source, &gallery);
                            // Release before replying so the caller can trigger again at once.
                            drop(guard);
                            let _ = reply.send(result);
                        }
                        EngineRequest::Shutdown => break,
                    }
                }
                tracing::info!("engine thread exiting");
            })
            .map_err(EngineError::Spawn)?;

        Ok(Self {
            handle: EngineHandle { tx, in_flight },
            thread,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the engine thread and release camera and model.
    pub async fn close(self) {
        let _ = self.handle.tx.send(EngineRequest::Shutdown).await;
        drop(self.handle);
        let thread = self.thread;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => tracing::info!("session closed"),
            _ => tracing::warn!("engine thread did not shut down cleanly"),
        }
    }
}

/// Open the configured camera: explicit device path, else by index.
pub fn open_camera(config: &Config) -> Result<Camera, CaptureError> {
    match &config.camera_device {
        Some(path) => Camera::open_path(path),
        None => Camera::open(config.camera_index),
    }
}

/// Read one frame and crop it with the verification geometry.
fn run_preview<M: SimilarityModel>(
    source: &mut dyn FrameSource,
    verifier: &Verifier<M>,
) -> Option<Frame> {
    let frame = match source.read_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "preview: frame capture failed; skipping tick");
            return None;
        }
    };
    match verifier.geometry().apply(&frame) {
        Ok(crop) => Some(crop),
        Err(e) => {
            tracing::warn!(error = %e, "preview: crop failed; skipping tick");
            None
        }
    }
}
