//! The transcription session: lifecycle state, the shared transport
//! handle and the caller-facing API.
//!
//! A session is created `Unconnected`, observers are registered, then
//! `connect` performs the handshake and spawns the listener task. The
//! listener owns the read half of the WebSocket; every write (audio and
//! control frames) goes through a single writer lock.

mod connect;
mod listener;
mod shutdown;

pub use connect::build_url;

use crate::config::TranscriberConfig;
use crate::dispatch::{Conduit, Dispatcher, ObserverRegistry};
use crate::error::{Result, TranscriberError};
use crate::protocol::{self, SessionBegins, Transcript};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use strum::Display;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsWriter = SplitSink<WsStream, Message>;
pub(crate) type WsReader = SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Active,
    Closing,
    Closed,
}

/// State shared between the caller and the listener task
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    pub(crate) dispatcher: Dispatcher,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    pending_termination: Mutex<Option<oneshot::Sender<()>>>,
    fault: Mutex<Option<String>>,
    /// Stops the listener without treating the exit as a fault
    pub(crate) shutdown: CancellationToken,
    /// Cancelled when the listener loop has exited
    pub(crate) listener_done: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(dispatcher: Dispatcher) -> Self {
        Self {
            state: Mutex::new(SessionState::Unconnected),
            dispatcher,
            writer: tokio::sync::Mutex::new(None),
            pending_termination: Mutex::new(None),
            fault: Mutex::new(None),
            shutdown: CancellationToken::new(),
            listener_done: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != next {
            log::debug!("Session state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Move `from -> to` atomically, returning the actual state on mismatch
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> std::result::Result<(), SessionState> {
        let mut state = lock(&self.state);
        if *state != from {
            return Err(*state);
        }
        log::debug!("Session state {} -> {}", from, to);
        *state = to;
        Ok(())
    }

    pub(crate) fn fault(&self) -> Option<String> {
        lock(&self.fault).clone()
    }

    pub(crate) fn record_fault(&self, error: &TranscriberError) {
        let mut fault = lock(&self.fault);
        if fault.is_none() {
            *fault = Some(error.to_string());
        }
    }

    pub(crate) fn arm_termination(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.pending_termination) = Some(tx);
        rx
    }

    /// Resolve a pending graceful close. Returns false if none was armed.
    pub(crate) fn resolve_termination(&self) -> bool {
        match lock(&self.pending_termination).take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Release anyone waiting on termination without resolving it
    pub(crate) fn abandon_termination(&self) {
        lock(&self.pending_termination).take();
    }

    pub(crate) async fn install_writer(&self, writer: WsWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Send one binary audio frame. The state is checked under the writer
    /// lock so no audio can follow the terminate message.
    async fn write_audio(&self, audio: Vec<u8>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let state = self.state();
        if state != SessionState::Active {
            return Err(self.inactive_error("send audio", state));
        }
        let Some(sink) = writer.as_mut() else {
            return Err(self.inactive_error("send audio", state));
        };
        let len = audio.len();
        sink.send(Message::Binary(audio.into())).await?;
        log::trace!("📤 Sent {} bytes of audio", len);
        Ok(())
    }

    fn inactive_error(&self, operation: &'static str, state: SessionState) -> TranscriberError {
        match self.fault() {
            Some(fault) => TranscriberError::Faulted(fault),
            None => TranscriberError::InvalidState { operation, state },
        }
    }

    /// Send the terminate-session control message
    pub(crate) async fn write_terminate(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(TranscriberError::InvalidState {
                operation: "terminate session",
                state: self.state(),
            });
        };
        log::info!("📡 Requesting session termination");
        sink.send(Message::Text(protocol::terminate_session_message().into()))
            .await?;
        Ok(())
    }

    /// Send a normal close frame. A transport that is already closed is not
    /// an error here.
    pub(crate) async fn write_close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Ok(());
        };
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        match sink.send(Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed)
            | Err(tungstenite::Error::Protocol(ProtocolError::SendAfterClosing)) => {
                log::debug!("Transport already closing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn release_writer(&self) {
        self.writer.lock().await.take();
    }

    /// Terminate without waiting for acknowledgment: best-effort terminate
    /// message and close frame, then stop the listener and finalize.
    pub(crate) async fn abrupt_teardown(&self) {
        if let Err(e) = self.write_terminate().await {
            log::debug!("Terminate message not sent: {}", e);
        }
        if let Err(e) = self.write_close().await {
            log::warn!("Failed to send close frame: {}", e);
        }
        self.shutdown.cancel();
        self.finalize();
        self.release_writer().await;
    }

    /// Mark the session closed and release every consumer
    pub(crate) fn finalize(&self) {
        self.set_state(SessionState::Closed);
        self.abandon_termination();
        self.dispatcher
            .closed(protocol::ClosureInfo::new(protocol::CLOSE_NORMAL, "closed by client"));
    }
}

/// A real-time transcription session.
///
/// Dropping an active session performs an abrupt close on the current
/// Tokio runtime; call [`RealtimeTranscriber::close`] to wait for every
/// in-flight transcript instead.
pub struct RealtimeTranscriber {
    config: TranscriberConfig,
    shared: Arc<Shared>,
    listener: tokio::sync::Mutex<Option<JoinHandle<Result<()>>>>,
    close_lock: tokio::sync::Mutex<()>,
    session_info: OnceLock<SessionBegins>,
}

impl std::fmt::Debug for RealtimeTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeTranscriber")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("session_info", &self.session_info.get())
            .finish()
    }
}

impl RealtimeTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        let dispatcher = Dispatcher::new(config.conduit_capacity);
        Self {
            config,
            shared: Arc::new(Shared::new(dispatcher)),
            listener: tokio::sync::Mutex::new(None),
            close_lock: tokio::sync::Mutex::new(()),
            session_info: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &TranscriberConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// The handshake result, once connected
    pub fn session_info(&self) -> Option<&SessionBegins> {
        self.session_info.get()
    }

    /// The fatal condition that ended the listener loop, if any
    pub fn fault(&self) -> Option<String> {
        self.shared.fault()
    }

    pub fn observers(&self) -> &ObserverRegistry {
        self.shared.dispatcher.observers()
    }

    pub fn partial_transcripts(&self) -> Conduit<Transcript> {
        self.shared.dispatcher.partials()
    }

    pub fn final_transcripts(&self) -> Conduit<Transcript> {
        self.shared.dispatcher.finals()
    }

    /// Partial and final transcripts interleaved in arrival order
    pub fn transcripts(&self) -> Conduit<Transcript> {
        self.shared.dispatcher.transcripts()
    }

    /// Send a block of audio as a single binary frame
    pub async fn send_audio(&self, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }
        self.shared.write_audio(audio.to_vec()).await
    }

    /// Send audio, giving up if `cancel` fires first
    pub async fn send_audio_with_cancel(
        &self,
        audio: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TranscriberError::Cancelled),
            result = self.send_audio(audio) => result,
        }
    }
}

impl Drop for RealtimeTranscriber {
    fn drop(&mut self) {
        if !matches!(self.state(), SessionState::Active | SessionState::Closing) {
            return;
        }
        log::info!("🔚 Session dropped while open, closing abruptly");
        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shared.abrupt_teardown().await });
            }
            Err(_) => {
                // No runtime left to send on; dropping the halves closes the socket
                shared.shutdown.cancel();
                shared.finalize();
            }
        }
    }
}
