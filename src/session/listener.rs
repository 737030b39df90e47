use super::{SessionState, Shared, WsReader};
use crate::error::{Result, TranscriberError};
use crate::protocol::{
    ClosureInfo, MessageType, ServerMessage, Transcript, TranscriptBody, CLOSE_ABNORMAL,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// The listener task: pump inbound frames until the server closes the
/// connection, the session shuts down, or a fatal error occurs.
///
/// A fatal exit is recorded as the session fault, reported as an error
/// event, and still completes every conduit so no consumer hangs.
pub(crate) async fn run(shared: Arc<Shared>, mut reader: WsReader, cancel: CancellationToken) -> Result<()> {
    log::info!("👂 Listening for server messages");

    let result = pump(&shared, &mut reader, &cancel).await;

    if let Err(e) = &result {
        log::error!("❌ Listener stopped: {}", e);
        shared.record_fault(e);
        shared.set_state(SessionState::Closed);
        shared.dispatcher.error(e.to_string());
        drop(reader);
        // Equivalent to an abrupt close from here on
        if let Err(e) = shared.write_terminate().await {
            log::debug!("Terminate message not sent: {}", e);
        }
        if let Err(e) = shared.write_close().await {
            log::debug!("Close frame not sent: {}", e);
        }
        shared.dispatcher.closed(ClosureInfo::new(CLOSE_ABNORMAL, e.to_string()));
        shared.release_writer().await;
    }

    shared.set_state(SessionState::Closed);
    shared.abandon_termination();
    shared.dispatcher.complete_all();
    shared.listener_done.cancel();

    log::info!("👂 Listener exited");
    result
}

async fn pump(shared: &Shared, reader: &mut WsReader, cancel: &CancellationToken) -> Result<()> {
    let mut message_count: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                log::debug!("Listener shut down after {} messages", message_count);
                return Ok(());
            }
            _ = cancel.cancelled() => return Err(TranscriberError::Cancelled),
            next = reader.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(TranscriberError::ProtocolViolation(
                    "transport closed without a close frame".to_string(),
                ))
            }
        };

        let decoded = match message {
            Message::Text(text) => ServerMessage::parse(text.as_str())?,
            Message::Binary(data) => ServerMessage::parse_bytes(data.as_slice())?,
            Message::Close(frame) => {
                let info = ClosureInfo::from_frame(frame);
                log::info!("🔚 Server closed connection: {} {}", info.code, info.reason);
                shared.set_state(SessionState::Closed);
                // Flush the close reply and drop the sink so the socket shuts
                if let Err(e) = shared.write_close().await {
                    log::debug!("Close reply not sent: {}", e);
                }
                shared.release_writer().await;
                shared.dispatcher.closed(info);
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        message_count += 1;
        dispatch(shared, decoded).await?;
    }
}

/// Route one decoded message. The error indicator and the discriminator
/// are independent: both are handled when both are present.
async fn dispatch(shared: &Shared, message: ServerMessage) -> Result<()> {
    if let Some(error) = &message.error {
        log::warn!("⚠️ Server reported error: {}", error);
        shared.dispatcher.error(error.clone());
    }

    match &message.message_type {
        Some(MessageType::SessionBegins) => Err(TranscriberError::ProtocolViolation(
            "server sent SessionBegins on an active session".to_string(),
        )),
        Some(MessageType::PartialTranscript) => {
            let Some(body) = transcript_body(&message) else {
                return Ok(());
            };
            log::debug!("Partial transcript: '{}'", body.text);
            shared.dispatcher.transcript(Transcript::Partial(body)).await
        }
        Some(MessageType::FinalTranscript) => {
            let Some(body) = transcript_body(&message) else {
                return Ok(());
            };
            log::info!("Final transcript: '{}'", body.text);
            shared.dispatcher.transcript(Transcript::Final(body)).await
        }
        Some(MessageType::SessionTerminated) => {
            if shared.resolve_termination() {
                log::info!("📡 Session termination acknowledged");
            } else {
                log::debug!("Unsolicited SessionTerminated");
            }
            Ok(())
        }
        Some(MessageType::Unknown(tag)) => {
            log::debug!("Ignoring unrecognised message type '{}'", tag);
            Ok(())
        }
        None => Ok(()),
    }
}

/// Transcript payloads in a shape this client does not understand are skipped
fn transcript_body(message: &ServerMessage) -> Option<TranscriptBody> {
    match message.transcript_body() {
        Ok(body) => Some(body),
        Err(e) => {
            log::warn!("⚠️ Skipping unreadable {:?} payload: {}", message.message_type, e);
            None
        }
    }
}
