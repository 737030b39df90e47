use super::{RealtimeTranscriber, SessionState};
use crate::error::{Result, TranscriberError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownMode {
    /// Wait for SessionTerminated so every transcript is delivered first
    Graceful,
    /// Send terminate and close immediately; undelivered results are lost
    Abrupt,
}

impl RealtimeTranscriber {
    /// Gracefully end the session.
    ///
    /// Sends the terminate message, waits until the listener has seen the
    /// server's acknowledgment (or the connection has closed), then closes
    /// the transport. Returns the listener's fault if it ended fatally.
    /// Safe to call repeatedly or concurrently; later callers wait for the
    /// first one to finish.
    pub async fn close(&self) -> Result<()> {
        self.shutdown(ShutdownMode::Graceful).await
    }

    /// End the session without waiting for the server's acknowledgment
    pub async fn close_abrupt(&self) -> Result<()> {
        self.shutdown(ShutdownMode::Abrupt).await
    }

    async fn shutdown(&self, mode: ShutdownMode) -> Result<()> {
        let _guard = self.close_lock.lock().await;

        match self.shared.state() {
            SessionState::Active => {}
            SessionState::Unconnected => {
                self.shared.finalize();
                return Ok(());
            }
            SessionState::Connecting => {
                return Err(TranscriberError::InvalidState {
                    operation: "close",
                    state: SessionState::Connecting,
                })
            }
            // Already torn down, possibly by the listener; collect its result
            SessionState::Closing | SessionState::Closed => {
                let result = self.join_listener().await;
                self.shared.release_writer().await;
                return result;
            }
        }

        self.shared.set_state(SessionState::Closing);
        log::info!("🔚 Closing session ({:?})", mode);

        match mode {
            ShutdownMode::Graceful => self.graceful().await,
            ShutdownMode::Abrupt => {
                self.shared.abrupt_teardown().await;
                self.join_listener().await
            }
        }
    }

    async fn graceful(&self) -> Result<()> {
        let acknowledged = self.shared.arm_termination();

        match self.shared.write_terminate().await {
            Ok(()) => {
                tokio::select! {
                    ack = acknowledged => {
                        if ack.is_ok() {
                            log::debug!("Termination acknowledged, closing transport");
                        }
                    }
                    _ = self.shared.listener_done.cancelled() => {
                        log::debug!("Listener exited before acknowledgment");
                    }
                }
            }
            Err(e) => {
                log::warn!("Failed to send terminate message: {}", e);
                self.shared.abandon_termination();
            }
        }

        let close_result = self.shared.write_close().await;
        if let Err(e) = &close_result {
            log::warn!("Failed to send close frame: {}", e);
            // The server's close reply will never come; stop reading
            self.shared.shutdown.cancel();
        }

        // The listener exits once it reads the server's close frame
        let listener_result = self.join_listener().await;

        self.shared.finalize();
        self.shared.release_writer().await;
        log::info!("🔚 Session closed");

        listener_result.and(close_result)
    }

    /// Wait for the listener task and surface its outcome
    async fn join_listener(&self) -> Result<()> {
        let handle = self.listener.lock().await.take();
        match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(TranscriberError::Faulted(format!("listener task failed: {}", e))),
            },
            None => Ok(()),
        }
    }
}
