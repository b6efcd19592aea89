use rollcall_core::{
    take_attendance, AttendanceOutcome, FaceAnalyzer, GalleryError, GalleryStore, RebuildReport,
    ReconcilePolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("failed to start engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    TakeAttendance {
        image: PathBuf,
        reply: oneshot::Sender<AttendanceOutcome>,
    },
    Rebuild {
        reply: oneshot::Sender<Result<RebuildReport, GalleryError>>,
    },
}

/// What the engine does with the gallery before serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryInit {
    /// Load the snapshot, rebuilding if it is missing or unreadable.
    Load,
    /// Start empty; the caller is about to request a rebuild.
    Skip,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Reconcile one photo. Requests are served strictly one at a time.
    pub async fn take_attendance(&self, image: PathBuf) -> Result<AttendanceOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::TakeAttendance {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Force a gallery rebuild from the reference images.
    pub async fn rebuild(&self) -> Result<RebuildReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Rebuild { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// With [`GalleryInit::Load`] the gallery is loaded synchronously first
/// (fail-fast). Requests are then served until every handle is dropped. The
/// analyzer is owned by the thread.
pub fn spawn_engine(
    store: Arc<GalleryStore>,
    mut analyzer: Box<dyn FaceAnalyzer + Send>,
    policy: ReconcilePolicy,
    init: GalleryInit,
) -> Result<EngineHandle, EngineError> {
    if init == GalleryInit::Load {
        let identities = store.load(&mut analyzer)?;
        tracing::info!(identities, "gallery ready");
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::TakeAttendance { image, reply } => {
                        let outcome = take_attendance(&store, &mut analyzer, &image, &policy);
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::Rebuild { reply } => {
                        let _ = reply.send(store.rebuild(&mut analyzer));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
