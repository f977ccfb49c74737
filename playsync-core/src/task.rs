//! Background task handles

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::player::PlayerError;

/// Handle to a spawned publisher or controller loop.
///
/// Dropping the handle also stops the loop.
pub struct TaskHandle {
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<Result<(), PlayerError>>,
}

impl TaskHandle {
    pub(crate) fn new(
        cancel: oneshot::Sender<()>,
        join: JoinHandle<Result<(), PlayerError>>,
    ) -> Self {
        Self {
            cancel: Some(cancel),
            join,
        }
    }

    /// Ask the loop to stop after its current iteration
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Whether the loop has already exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit and return its result
    pub async fn join(mut self) -> Result<(), PlayerError> {
        match (&mut self.join).await {
            Ok(result) => result,
            Err(e) => Err(PlayerError::Disconnected(format!("task failed: {e}"))),
        }
    }

    /// Stop the loop and wait for it
    pub async fn stop(mut self) -> Result<(), PlayerError> {
        self.shutdown();
        self.join().await
    }
}

/// Whether a loop should stop: a shutdown was requested or the handle is gone
pub(crate) fn is_cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty))
}
