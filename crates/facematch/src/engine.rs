use facematch_core::{AnalyzeError, Descriptor, Frame, ModelSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analysis failed: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the comparison flow to the engine thread.
enum EngineRequest {
    Describe {
        frame: Arc<Frame>,
        reply: oneshot::Sender<Result<Option<Descriptor>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request a descriptor for the most confident face in `frame`.
    ///
    /// `Ok(None)` when no face was detected.
    pub async fn describe(&self, frame: Arc<Frame>) -> Result<Option<Descriptor>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Describe {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Move a loaded model set onto a dedicated OS thread and serve requests.
///
/// ONNX sessions need exclusive access to run, so requests issued together
/// are served one after the other in arrival order.
pub fn spawn_engine(mut models: ModelSet) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Describe { frame, reply } => {
                        let started = std::time::Instant::now();
                        let result = models.describe(&frame).map_err(EngineError::from);
                        tracing::debug!(
                            width = frame.width,
                            height = frame.height,
                            found = matches!(result, Ok(Some(_))),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "describe finished"
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
