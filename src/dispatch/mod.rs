//! Fan-out of classified session events to observers and conduits.

pub mod conduit;
pub mod observers;

use crate::error::Result;
use crate::protocol::{ClosureInfo, ErrorNotification, SessionBegins, Transcript};
use std::sync::atomic::{AtomicBool, Ordering};

pub use conduit::{Conduit, ConduitCapacity, OverflowPolicy};
pub use observers::ObserverRegistry;

/// Delivers each event to every registered observer and to the conduits.
///
/// The typed conduit (partial or final) is always published before the
/// unified one, so a single reader of both never sees an item in the
/// unified conduit first.
#[derive(Debug)]
pub struct Dispatcher {
    observers: ObserverRegistry,
    partials: Conduit<Transcript>,
    finals: Conduit<Transcript>,
    transcripts: Conduit<Transcript>,
    closed_emitted: AtomicBool,
}

impl Dispatcher {
    pub fn new(capacity: ConduitCapacity) -> Self {
        Self {
            observers: ObserverRegistry::default(),
            partials: Conduit::new(capacity),
            finals: Conduit::new(capacity),
            transcripts: Conduit::new(capacity),
            closed_emitted: AtomicBool::new(false),
        }
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn partials(&self) -> Conduit<Transcript> {
        self.partials.clone()
    }

    pub fn finals(&self) -> Conduit<Transcript> {
        self.finals.clone()
    }

    pub fn transcripts(&self) -> Conduit<Transcript> {
        self.transcripts.clone()
    }

    pub fn session_begins(&self, info: &SessionBegins) {
        self.observers.emit_session_begins(info);
    }

    pub async fn transcript(&self, transcript: Transcript) -> Result<()> {
        let typed = match transcript {
            Transcript::Partial(_) => &self.partials,
            Transcript::Final(_) => &self.finals,
        };
        typed.publish(transcript.clone()).await?;
        self.transcripts.publish(transcript.clone()).await?;
        self.observers.emit_transcript(&transcript);
        Ok(())
    }

    pub fn error(&self, message: impl Into<String>) {
        self.observers.emit_error(&ErrorNotification {
            message: message.into(),
        });
    }

    /// Emit the closed event, then complete every conduit. Observers hear
    /// about the closure before any conduit reader is released.
    /// Only the first call per session emits; returns whether it was this one.
    pub fn closed(&self, info: ClosureInfo) -> bool {
        if self.closed_emitted.swap(true, Ordering::SeqCst) {
            log::debug!("Closed event already emitted, ignoring {:?}", info);
            self.complete_all();
            return false;
        }
        self.observers.emit_closed(&info);
        self.complete_all();
        true
    }

    pub fn complete_all(&self) {
        self.partials.complete();
        self.finals.complete();
        self.transcripts.complete();
    }

    pub fn all_completed(&self) -> bool {
        self.partials.is_completed() && self.finals.is_completed() && self.transcripts.is_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TranscriptBody;
    use std::sync::{Arc, Mutex};

    fn body(text: &str) -> TranscriptBody {
        TranscriptBody {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transcripts_routed_by_kind() {
        let dispatcher = Dispatcher::new(ConduitCapacity::Unbounded);
        dispatcher.transcript(Transcript::Partial(body("he"))).await.unwrap();
        dispatcher.transcript(Transcript::Final(body("hello"))).await.unwrap();
        dispatcher.transcript(Transcript::Partial(body("wo"))).await.unwrap();

        let partials = dispatcher.partials();
        assert_eq!(partials.try_recv().unwrap().text(), "he");
        assert_eq!(partials.try_recv().unwrap().text(), "wo");
        assert!(partials.try_recv().is_none());

        let finals = dispatcher.finals();
        assert_eq!(finals.try_recv().unwrap().text(), "hello");
        assert!(finals.try_recv().is_none());

        let unified = dispatcher.transcripts();
        let order: Vec<String> = std::iter::from_fn(|| unified.try_recv())
            .map(|t| t.text().to_string())
            .collect();
        assert_eq!(order, vec!["he", "hello", "wo"]);
    }

    #[tokio::test]
    async fn test_closed_emitted_once() {
        let dispatcher = Dispatcher::new(ConduitCapacity::Unbounded);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        dispatcher
            .observers()
            .on_closed(move |info| s.lock().unwrap().push(info.code));

        assert!(dispatcher.closed(ClosureInfo::new(4001, "unauthorized")));
        assert!(!dispatcher.closed(ClosureInfo::new(1006, "late")));

        assert_eq!(*seen.lock().unwrap(), vec![4001]);
        assert!(dispatcher.all_completed());
    }

    #[tokio::test]
    async fn test_error_does_not_complete_conduits() {
        let dispatcher = Dispatcher::new(ConduitCapacity::Unbounded);
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        dispatcher
            .observers()
            .on_error(move |e| *s.lock().unwrap() = Some(e.message.clone()));

        dispatcher.error("Audio too short");
        assert_eq!(seen.lock().unwrap().as_deref(), Some("Audio too short"));
        assert!(!dispatcher.all_completed());
    }
}
