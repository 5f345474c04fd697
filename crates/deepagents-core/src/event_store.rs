//! Broadcast + history event store for session observers.

use std::{
    mem::{Discriminant, discriminant},
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::SessionEvent;

/// Live channel capacity before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
struct StoredEvent {
    seq: u64,
    event: SessionEvent,
}

struct Inner {
    /// Latest event of each kind, oldest first. Each event carries the
    /// full value of its part of the view, so older ones of the same kind
    /// are superseded.
    history: Vec<StoredEvent>,
    next_seq: u64,
}

/// Event store with broadcast and history support.
///
/// New subscribers receive the history first, then live events.
pub struct EventStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<StoredEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

fn kind(event: &SessionEvent) -> Discriminant<SessionEvent> {
    discriminant(event)
}

impl EventStore {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: Vec::with_capacity(8),
                next_seq: 0,
            }),
            sender,
        }
    }

    /// Push an event to history and live listeners.
    pub fn push(&self, event: SessionEvent) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let stored = StoredEvent {
            seq: inner.next_seq,
            event,
        };
        inner.next_seq += 1;

        let k = kind(&stored.event);
        inner.history.retain(|s| kind(&s.event) != k);
        inner.history.push(stored.clone());

        // Sent under the lock so a subscriber's history snapshot and its
        // live stream agree on ordering.
        let _ = self.sender.send(stored);
    }

    /// Replayable history: the latest event of each kind.
    #[must_use]
    pub fn get_history(&self) -> Vec<SessionEvent> {
        self.snapshot().1
    }

    fn snapshot(&self) -> (Option<u64>, Vec<SessionEvent>) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let last_seq = inner.next_seq.checked_sub(1);
        let events = inner.history.iter().map(|s| s.event.clone()).collect();
        (last_seq, events)
    }

    /// Stream that yields history first, then live events.
    ///
    /// Lagged receivers skip the events they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionEvent> {
        let rx = self.sender.subscribe();
        let (last_seq, history) = self.snapshot();

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(move |res| async move {
            match res {
                Ok(stored) if last_seq.is_some_and(|seen| stored.seq <= seen) => None,
                Ok(stored) => Some(stored.event),
                Err(e) => {
                    tracing::warn!("session event subscriber lagged: {e}");
                    None
                }
            }
        });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::SessionPhase;

    fn phase(phase: SessionPhase) -> SessionEvent {
        SessionEvent::Phase { phase }
    }

    #[test]
    fn test_history_then_live() {
        tokio_test::block_on(async {
            let store = EventStore::new();
            store.push(phase(SessionPhase::Submitting));

            let mut stream = store.history_plus_stream();
            store.push(phase(SessionPhase::Streaming));

            assert_eq!(stream.next().await, Some(phase(SessionPhase::Submitting)));
            assert_eq!(stream.next().await, Some(phase(SessionPhase::Streaming)));
        });
    }

    #[test]
    fn test_history_keeps_latest_of_each_kind() {
        let store = EventStore::new();
        let big = "x".repeat(10 * 1024);
        for i in 0..2000 {
            let files = (0..10)
                .map(|f| (format!("file{f}.txt"), format!("{big}{i}")))
                .collect::<BTreeMap<_, _>>();
            store.push(SessionEvent::Files { files });
            store.push(phase(SessionPhase::Streaming));
        }
        store.push(phase(SessionPhase::Idle));

        let history = store.get_history();
        assert_eq!(history.len(), 2);
        match &history[0] {
            SessionEvent::Files { files } => {
                assert_eq!(files["file0.txt"], format!("{big}1999"));
            }
            other => panic!("Wrong event: {other:?}"),
        }
        assert_eq!(history[1], phase(SessionPhase::Idle));
    }

    #[test]
    fn test_subscriber_sees_each_event_once() {
        tokio_test::block_on(async {
            let store = EventStore::new();
            store.push(SessionEvent::ThreadChanged { thread_id: None });
            store.push(phase(SessionPhase::Submitting));

            let mut stream = store.history_plus_stream();
            store.push(SessionEvent::Todos { todos: vec![] });

            assert_eq!(
                stream.next().await,
                Some(SessionEvent::ThreadChanged { thread_id: None })
            );
            assert_eq!(stream.next().await, Some(phase(SessionPhase::Submitting)));
            assert_eq!(
                stream.next().await,
                Some(SessionEvent::Todos { todos: vec![] })
            );

            store.push(phase(SessionPhase::Idle));
            assert_eq!(stream.next().await, Some(phase(SessionPhase::Idle)));
        });
    }
}
