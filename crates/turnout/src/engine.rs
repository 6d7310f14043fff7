use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use turnout_core::{
    load_known_faces, BoundingBox, EmbedError, Embedding, FaceEmbedder, FaceMatcher, KnownFace,
    UserRecord,
};

/// Pending requests the engine thread may queue before callers are told it is busy.
const REQUEST_QUEUE: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("face embedding failed: {0}")]
    Embed(#[from] EmbedError),
    #[error("engine is busy")]
    Busy,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Outcome for one detected face in a recognition pass.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub bbox: BoundingBox,
    /// Matched identity, `None` when nobody in the directory is within tolerance.
    pub identity: Option<String>,
    pub distance: Option<f32>,
}

type PassResult = Result<Vec<Recognition>, EngineError>;

/// Messages sent from the recognition loop to the engine thread.
enum EngineRequest {
    LoadDirectory {
        users: Vec<UserRecord>,
        reply: oneshot::Sender<Vec<KnownFace>>,
    },
    Recognize {
        image: RgbImage,
        directory: Arc<[KnownFace]>,
        matcher: FaceMatcher,
        reply: oneshot::Sender<PassResult>,
    },
}

/// A recognition pass submitted to the engine and not yet collected.
pub struct PendingPass {
    reply: oneshot::Receiver<PassResult>,
}

impl PendingPass {
    /// The pass result if the engine has finished, `None` while it is still running.
    pub fn try_take(&mut self) -> Option<PassResult> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(EngineError::ChannelClosed)),
        }
    }

    /// Wait for the pass to finish.
    pub async fn wait(self) -> PassResult {
        self.reply.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Build directory entries from stored users on the engine thread.
    pub async fn load_directory(&self, users: Vec<UserRecord>) -> Result<Vec<KnownFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::LoadDirectory {
                users,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Queue a recognition pass without waiting for it.
    pub fn submit(
        &self,
        image: RgbImage,
        directory: Arc<[KnownFace]>,
        matcher: FaceMatcher,
    ) -> Result<PendingPass, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .try_send(EngineRequest::Recognize {
                image,
                directory,
                matcher,
                reply: reply_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EngineError::Busy,
                mpsc::error::TrySendError::Closed(_) => EngineError::ChannelClosed,
            })?;
        Ok(PendingPass { reply: reply_rx })
    }
}

/// Spawn the engine on a dedicated OS thread that owns `embedder`.
///
/// The thread exits once every [`EngineHandle`] is dropped.
pub fn spawn_engine(mut embedder: Box<dyn FaceEmbedder>) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(REQUEST_QUEUE);

    std::thread::Builder::new()
        .name("turnout-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::LoadDirectory { users, reply } => {
                        let faces = load_known_faces(&users, embedder.as_mut());
                        let _ = reply.send(faces);
                    }
                    EngineRequest::Recognize {
                        image,
                        directory,
                        matcher,
                        reply,
                    } => {
                        let result = run_pass(embedder.as_mut(), &image, &directory, &matcher);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Detect every face in `image` and match each one against `directory`.
fn run_pass(
    embedder: &mut dyn FaceEmbedder,
    image: &RgbImage,
    directory: &[KnownFace],
    matcher: &FaceMatcher,
) -> PassResult {
    let boxes = embedder.detect_faces(image)?;
    if boxes.is_empty() {
        return Ok(Vec::new());
    }
    let embeddings = embedder.embed(image, &boxes)?;
    tracing::debug!(faces = boxes.len(), known = directory.len(), "recognition pass");

    let distance = |probe: &Embedding, known: &Embedding| embedder.distance(probe, known);
    Ok(boxes
        .into_iter()
        .zip(embeddings.iter())
        .map(|(bbox, embedding)| match matcher.find_by(embedding, directory, &distance) {
            Some(found) => Recognition {
                bbox,
                identity: Some(found.identity),
                distance: Some(found.distance),
            },
            None => Recognition {
                bbox,
                identity: None,
                distance: None,
            },
        })
        .collect())
}
