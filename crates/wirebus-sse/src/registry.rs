use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use wirebus_core::{Envelope, SessionId, TransportError};

/// One live subscribe connection: the sending half of its private delivery queue.
/// The receiving half belongs to the connection's event stream.
struct Session {
    outbound: mpsc::Sender<Envelope>,
}

/// Sessions keyed by id. Holds exactly the connections whose subscribe
/// stream is still alive.
///
/// Routing takes the read lock; register/unregister take the write lock.
/// Enqueueing happens while the read lock is held and the only sender lives
/// in the map, so once an entry is removed no send can reach its queue.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Allocate a fresh id and delivery queue, insert it, and hand back the receiving end.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut sessions = self.sessions.write();
        loop {
            let id = SessionId::new();
            if let Entry::Vacant(slot) = sessions.entry(id.clone()) {
                slot.insert(Session { outbound: tx });
                tracing::debug!(session_id = %id, active = sessions.len(), "session registered");
                return (id, rx);
            }
        }
    }

    /// Remove a session and close its queue. Returns false if it was already gone.
    pub fn unregister(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(_session) => {
                tracing::debug!(session_id = %id, "session unregistered");
                true
            }
            None => false,
        }
    }

    /// Enqueue an envelope for one session without waiting on its reader.
    pub fn route_to(&self, id: &SessionId, envelope: Envelope) -> Result<(), TransportError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| TransportError::SessionNotFound(id.clone()))?;

        match session.outbound.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(env)) => {
                tracing::warn!(
                    session_id = %id,
                    message_id = ?env.id,
                    capacity = self.queue_capacity,
                    "delivery queue full, rejecting envelope"
                );
                Err(TransportError::SessionBacklogged(id.clone()))
            }
            // Stream already dropped; its guard is about to unregister.
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportError::SessionNotFound(id.clone()))
            }
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn env(id: i64) -> Envelope {
        Envelope::request(id, "ping", None)
    }

    #[test]
    fn register_and_unregister() {
        let registry = SessionRegistry::new(8);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_ne!(id1, id2);
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(&id1));

        assert!(registry.unregister(&id1));
        assert_eq!(registry.count(), 1);
        assert!(!registry.contains(&id1));

        assert!(registry.unregister(&id2));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unregister_twice_is_harmless() {
        let registry = SessionRegistry::new(8);
        let (id, _rx) = registry.register();
        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let registry = SessionRegistry::new(0);
        assert_eq!(registry.queue_capacity(), 1);
    }

    #[test]
    fn route_to_unknown_session() {
        let registry = SessionRegistry::new(8);
        let err = registry.route_to(&SessionId::from_raw("nope"), env(1)).unwrap_err();
        assert!(matches!(err, TransportError::SessionNotFound(id) if id.as_str() == "nope"));
    }

    #[tokio::test]
    async fn route_preserves_order() {
        let registry = SessionRegistry::new(8);
        let (id, mut rx) = registry.register();

        for i in 0..5 {
            registry.route_to(&id, env(i)).unwrap();
        }
        for i in 0..5 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.id, Some(i.into()));
        }
    }

    #[tokio::test]
    async fn unregistered_session_is_never_resurrected() {
        let registry = SessionRegistry::new(8);
        let (id, mut rx) = registry.register();
        registry.unregister(&id);

        // Queue is closed once the sender is dropped.
        assert!(rx.recv().await.is_none());

        let err = registry.route_to(&id, env(1)).unwrap_err();
        assert!(matches!(err, TransportError::SessionNotFound(_)));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn dropped_receiver_reports_not_found() {
        let registry = SessionRegistry::new(8);
        let (id, rx) = registry.register();
        drop(rx);
        let err = registry.route_to(&id, env(1)).unwrap_err();
        assert!(matches!(err, TransportError::SessionNotFound(_)));
    }

    #[test]
    fn full_queue_is_reported_not_dropped() {
        let registry = SessionRegistry::new(1);
        let (id, _rx) = registry.register();

        registry.route_to(&id, env(1)).unwrap();
        let err = registry.route_to(&id, env(2)).unwrap_err();
        assert!(matches!(err, TransportError::SessionBacklogged(_)));
        assert!(err.is_routing());
    }

    #[test]
    fn sessions_do_not_see_each_others_envelopes() {
        let registry = SessionRegistry::new(8);
        let (a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        registry.route_to(&a, env(1)).unwrap();

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_registration_yields_unique_ids() {
        let registry = Arc::new(SessionRegistry::new(4));
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let r = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (id, rx) = r.register();
                (id, rx)
            }));
        }

        let mut ids = HashSet::new();
        let mut receivers = Vec::new();
        for task in tasks {
            let (id, rx) = task.await.unwrap();
            ids.insert(id);
            receivers.push(rx);
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(registry.count(), 64);

        let listed: HashSet<SessionId> = registry.session_ids().into_iter().collect();
        assert_eq!(listed, ids);
    }
}
