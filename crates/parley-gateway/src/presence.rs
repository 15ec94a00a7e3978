use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// The live transport session for one connected user.
struct Session {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Presence registry: the single source of truth for who is online and where
/// to deliver a targeted push. Process-local, never persisted. At most one
/// session per user — a later connect from the same user replaces the mapping.
///
/// Every register/unregister broadcasts the full online-user list to all
/// sessions. No batching or debounce: a flood of connects produces an equal
/// flood of broadcasts (a scaling bound accepted at chat-app size).
#[derive(Clone)]
pub struct Presence {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    /// Broadcast channel — all connected clients receive all broadcast events
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> live session
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl Presence {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(PresenceInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register `user_id` as online, replacing any existing session
    /// (last-connection-wins). Returns the new session id and the receiver
    /// for targeted events.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .write()
            .await
            .insert(user_id, Session { session_id, tx });

        self.broadcast_online_users().await;
        (session_id, rx)
    }

    /// Remove the mapping for `user_id`, but only if it still belongs to
    /// `session_id`. A stale disconnect racing a newer connect from the same
    /// user must not evict the newer session.
    pub async fn unregister(&self, user_id: Uuid, session_id: Uuid) {
        {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get(&user_id) {
                Some(s) if s.session_id == session_id => {
                    sessions.remove(&user_id);
                }
                _ => {}
            }
        }

        self.broadcast_online_users().await;
    }

    /// Current session id for a user, if connected.
    pub async fn lookup(&self, user_id: Uuid) -> Option<Uuid> {
        self.inner
            .sessions
            .read()
            .await
            .get(&user_id)
            .map(|s| s.session_id)
    }

    /// Send a targeted event to a user's live session. Best-effort: if the
    /// user is offline the event is dropped silently — push is a latency
    /// optimization, the pull endpoints are ground truth.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(session) = sessions.get(&user_id) {
            let _ = session.tx.send(event);
        }
    }

    /// Current online user ids.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.sessions.read().await.keys().copied().collect()
    }

    async fn broadcast_online_users(&self) {
        let users = self.online_users().await;
        self.broadcast(GatewayEvent::OnlineUsers(users));
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_unregister_keeps_newer_session() {
        let presence = Presence::new();
        let user = Uuid::new_v4();

        let (s1, _rx1) = presence.register(user).await;
        let (s2, mut rx2) = presence.register(user).await;
        assert_ne!(s1, s2);

        // The old connection disconnects late — must not evict s2
        presence.unregister(user, s1).await;
        assert_eq!(presence.lookup(user).await, Some(s2));
        assert_eq!(presence.online_users().await, vec![user]);

        // Targeted delivery goes to the surviving session
        presence
            .send_to_user(user, GatewayEvent::OnlineUsers(vec![user]))
            .await;
        assert!(matches!(
            rx2.recv().await,
            Some(GatewayEvent::OnlineUsers(_))
        ));

        presence.unregister(user, s2).await;
        assert_eq!(presence.lookup(user).await, None);
    }

    #[tokio::test]
    async fn unregister_unknown_session_is_noop() {
        let presence = Presence::new();
        let user = Uuid::new_v4();

        presence.unregister(user, Uuid::new_v4()).await;
        assert!(presence.online_users().await.is_empty());

        let (_s, _rx) = presence.register(user).await;
        presence.unregister(user, Uuid::new_v4()).await;
        assert_eq!(presence.online_users().await, vec![user]);
    }

    #[tokio::test]
    async fn every_registry_change_broadcasts_online_list() {
        let presence = Presence::new();
        let user = Uuid::new_v4();
        let mut events = presence.subscribe();

        let (session, _rx) = presence.register(user).await;
        match events.recv().await.unwrap() {
            GatewayEvent::OnlineUsers(users) => assert_eq!(users, vec![user]),
            other => panic!("unexpected event: {:?}", other),
        }

        presence.unregister(user, session).await;
        match events.recv().await.unwrap() {
            GatewayEvent::OnlineUsers(users) => assert!(users.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_to_offline_user_is_dropped() {
        let presence = Presence::new();
        // No session registered — must not error or queue
        presence
            .send_to_user(Uuid::new_v4(), GatewayEvent::OnlineUsers(vec![]))
            .await;
    }
}
