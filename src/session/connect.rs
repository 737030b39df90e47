use super::{listener, RealtimeTranscriber, SessionState, WsReader, WsWriter};
use crate::config::{Credential, TranscriberConfig};
use crate::error::{Result, TranscriberError};
use crate::protocol::{ClosureInfo, MessageType, ServerMessage, SessionBegins, CLOSE_ABNORMAL};
use futures_util::StreamExt;
use http::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Assemble the connection URL. Optional parameters appear at most once,
/// and the credential is only added here when it is a temporary token.
pub fn build_url(config: &TranscriberConfig, credential: Credential<'_>) -> Result<Url> {
    let mut url = Url::parse(&config.endpoint)?;

    {
        let mut query = url.query_pairs_mut();

        if let Some(sample_rate) = config.sample_rate.filter(|rate| *rate > 0) {
            query.append_pair("sample_rate", &sample_rate.to_string());
        }

        if !config.word_boost.is_empty() {
            let words = serde_json::to_string(&config.word_boost)?;
            query.append_pair("word_boost", &words);
        }

        if let Some(encoding) = config.encoding {
            query.append_pair("encoding", &encoding.to_string());
        }

        if let Credential::Token(token) = credential {
            query.append_pair("token", token);
        }
    }

    // An empty serializer still leaves a dangling '?'
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

fn build_request(config: &TranscriberConfig) -> Result<Request> {
    let credential = config.validate()?;
    let url = build_url(config, credential)?;
    let mut request = url.as_str().into_client_request()?;

    if let Credential::ApiKey(key) = credential {
        let value = HeaderValue::from_str(key).map_err(|e| {
            TranscriberError::Configuration(format!("API key is not a valid header value: {}", e))
        })?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(request)
}

/// Read until the next data (text or binary) message, skipping control frames
async fn next_server_message(reader: &mut WsReader) -> Result<std::result::Result<ServerMessage, ClosureInfo>> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Ok(ServerMessage::parse(text.as_str())?)),
            Some(Ok(Message::Binary(data))) => return Ok(Ok(ServerMessage::parse_bytes(data.as_slice())?)),
            Some(Ok(Message::Close(frame))) => return Ok(Err(ClosureInfo::from_frame(frame))),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(TranscriberError::ProtocolViolation(
                    "connection ended during handshake".to_string(),
                ))
            }
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(TranscriberError::Cancelled),
        result = fut => result,
    }
}

impl RealtimeTranscriber {
    /// Connect without a cancellation signal
    pub async fn connect(&self) -> Result<SessionBegins> {
        self.connect_with_cancel(&CancellationToken::new()).await
    }

    /// Perform the handshake and start the listener.
    ///
    /// `cancel` covers both the handshake and the lifetime of the listener
    /// loop; cancelling after connect tears the session down abruptly.
    pub async fn connect_with_cancel(&self, cancel: &CancellationToken) -> Result<SessionBegins> {
        // Credential problems surface before any I/O
        let request = build_request(&self.config)?;

        self.shared
            .transition(SessionState::Unconnected, SessionState::Connecting)
            .map_err(|state| TranscriberError::InvalidState {
                operation: "connect",
                state,
            })?;

        log::info!("🌐 Connecting to real-time service at {}", self.config.endpoint);

        match self.handshake(request, cancel).await {
            Ok((begins, writer, reader)) => {
                self.shared.install_writer(writer).await;
                self.shared.set_state(SessionState::Active);
                let _ = self.session_info.set(begins.clone());

                log::info!(
                    "✅ Session {} started, expires at {}",
                    begins.session_id,
                    begins.expires_at
                );
                self.shared.dispatcher.session_begins(&begins);

                let handle = tokio::spawn(listener::run(
                    Arc::clone(&self.shared),
                    reader,
                    cancel.clone(),
                ));
                *self.listener.lock().await = Some(handle);

                Ok(begins)
            }
            Err(e) => {
                match &e {
                    TranscriberError::Cancelled | TranscriberError::Transport(_) => {
                        log::warn!("Connect attempt abandoned: {}", e);
                        self.shared.set_state(SessionState::Unconnected);
                    }
                    _ => {
                        log::error!("Handshake failed: {}", e);
                        self.shared.record_fault(&e);
                        self.shared.set_state(SessionState::Closed);
                        // Only completes the conduits if the server already closed
                        self.shared
                            .dispatcher
                            .closed(ClosureInfo::new(CLOSE_ABNORMAL, e.to_string()));
                    }
                }
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<(SessionBegins, WsWriter, WsReader)> {
        let (ws, response) = cancellable(cancel, async {
            connect_async(request).await.map_err(TranscriberError::from)
        })
        .await?;
        log::debug!("WebSocket upgraded, status: {}", response.status());

        let (writer, mut reader) = ws.split();

        let first = match cancellable(cancel, next_server_message(&mut reader)).await? {
            Ok(message) => message,
            Err(info) => {
                self.shared.dispatcher.closed(info.clone());
                return Err(TranscriberError::ProtocolViolation(format!(
                    "connection closed before session began ({} {})",
                    info.code, info.reason
                )));
            }
        };

        if let Some(error) = first.error.clone() {
            log::error!("❌ Server rejected session: {}", error);
            self.shared.dispatcher.error(error.clone());

            // The server closes the connection after reporting a handshake error
            return match cancellable(cancel, next_server_message(&mut reader)).await {
                Ok(Err(info)) => {
                    log::info!("🔚 Server closed connection: {} {}", info.code, info.reason);
                    self.shared.dispatcher.closed(info);
                    Err(TranscriberError::Handshake(error))
                }
                Err(TranscriberError::Cancelled) => Err(TranscriberError::Cancelled),
                other => {
                    if let Err(e) = other {
                        log::debug!("No close frame after handshake error: {}", e);
                    }
                    Err(TranscriberError::ProtocolViolation(
                        "expected close frame after handshake error".to_string(),
                    ))
                }
            };
        }

        match &first.message_type {
            Some(MessageType::SessionBegins) => {}
            other => {
                return Err(TranscriberError::ProtocolViolation(format!(
                    "unexpected message during handshake: {:?}",
                    other
                )))
            }
        }

        let begins = first.session_begins()?;
        Ok((begins, writer, reader))
    }
}
