use crate::protocol::{ClosureInfo, ErrorNotification, SessionBegins, Transcript};
use std::sync::{Arc, PoisonError, RwLock};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    callbacks: RwLock<Vec<Callback<T>>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Slot<T> {
    fn register(&self, callback: Callback<T>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn invoke(&self, value: &T) {
        // Snapshot so a callback may register further observers
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(value);
        }
    }

    fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Typed callback registry for session events.
///
/// Callbacks run on the listener task, so they should return quickly.
#[derive(Default)]
pub struct ObserverRegistry {
    session_begins: Slot<SessionBegins>,
    partial_transcript: Slot<Transcript>,
    final_transcript: Slot<Transcript>,
    transcript: Slot<Transcript>,
    error: Slot<ErrorNotification>,
    closed: Slot<ClosureInfo>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("session_begins", &self.session_begins.len())
            .field("partial_transcript", &self.partial_transcript.len())
            .field("final_transcript", &self.final_transcript.len())
            .field("transcript", &self.transcript.len())
            .field("error", &self.error.len())
            .field("closed", &self.closed.len())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn on_session_begins(&self, f: impl Fn(&SessionBegins) + Send + Sync + 'static) {
        self.session_begins.register(Arc::new(f));
    }

    pub fn on_partial_transcript(&self, f: impl Fn(&Transcript) + Send + Sync + 'static) {
        self.partial_transcript.register(Arc::new(f));
    }

    pub fn on_final_transcript(&self, f: impl Fn(&Transcript) + Send + Sync + 'static) {
        self.final_transcript.register(Arc::new(f));
    }

    /// Receives both partial and final transcripts
    pub fn on_transcript(&self, f: impl Fn(&Transcript) + Send + Sync + 'static) {
        self.transcript.register(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(&ErrorNotification) + Send + Sync + 'static) {
        self.error.register(Arc::new(f));
    }

    pub fn on_closed(&self, f: impl Fn(&ClosureInfo) + Send + Sync + 'static) {
        self.closed.register(Arc::new(f));
    }

    pub(crate) fn emit_session_begins(&self, info: &SessionBegins) {
        self.session_begins.invoke(info);
    }

    pub(crate) fn emit_transcript(&self, transcript: &Transcript) {
        match transcript {
            Transcript::Partial(_) => self.partial_transcript.invoke(transcript),
            Transcript::Final(_) => self.final_transcript.invoke(transcript),
        }
        self.transcript.invoke(transcript);
    }

    pub(crate) fn emit_error(&self, error: &ErrorNotification) {
        self.error.invoke(error);
    }

    pub(crate) fn emit_closed(&self, info: &ClosureInfo) {
        self.closed.invoke(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TranscriptBody;
    use std::sync::Mutex;

    fn transcript(text: &str, is_final: bool) -> Transcript {
        let body = TranscriptBody {
            text: text.to_string(),
            ..Default::default()
        };
        if is_final {
            Transcript::Final(body)
        } else {
            Transcript::Partial(body)
        }
    }

    #[test]
    fn test_typed_and_unified_callbacks() {
        let registry = ObserverRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        registry.on_partial_transcript(move |t| l.lock().unwrap().push(format!("partial:{}", t.text())));
        let l = Arc::clone(&log);
        registry.on_final_transcript(move |t| l.lock().unwrap().push(format!("final:{}", t.text())));
        let l = Arc::clone(&log);
        registry.on_transcript(move |t| l.lock().unwrap().push(format!("any:{}", t.text())));

        registry.emit_transcript(&transcript("hel", false));
        registry.emit_transcript(&transcript("hello", true));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["partial:hel", "any:hel", "final:hello", "any:hello"]
        );
    }

    #[test]
    fn test_multiple_observers_per_event() {
        let registry = ObserverRegistry::default();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            registry.on_closed(move |_| *c.lock().unwrap() += 1);
        }
        registry.emit_closed(&ClosureInfo::new(1000, ""));
        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[test]
    fn test_callback_may_register_observer() {
        let registry = Arc::new(ObserverRegistry::default());
        let inner = Arc::clone(&registry);
        registry.on_error(move |_| inner.on_error(|_| {}));
        registry.emit_error(&ErrorNotification {
            message: "boom".into(),
        });
        assert_eq!(registry.error.len(), 2);
    }
}
