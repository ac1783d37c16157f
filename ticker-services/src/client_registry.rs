//! Client identity registry
//!
//! Binds a generated [`ClientId`] to the outbound channel of each live
//! streaming connection.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ticker_core::{ClientId, RelayError, RelayResult, ServerMessage};

/// Outbound half of a client connection
pub type ClientChannel = mpsc::Sender<ServerMessage>;

/// Default number of id generation attempts before giving up
pub const DEFAULT_ID_ATTEMPTS: usize = 10;

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Tracks live clients and their outbound channels
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientChannel>>,
    generate_id: IdGenerator,
    max_attempts: usize,
}

impl ClientRegistry {
    /// Create a registry that issues random v4 UUIDs
    pub fn new(max_attempts: usize) -> Self {
        Self::with_id_generator(max_attempts, || Uuid::new_v4().to_string())
    }

    /// Create a registry with a custom id source
    pub fn with_id_generator(
        max_attempts: usize,
        generate_id: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            generate_id: Box::new(generate_id),
            max_attempts,
        }
    }

    /// Bind a fresh id to `channel`
    ///
    /// Fails with [`RelayError::IdentityExhausted`] when every attempt
    /// collides with a live id.
    pub fn register(&self, channel: ClientChannel) -> RelayResult<ClientId> {
        let mut clients = self.clients.write();

        for attempt in 1..=self.max_attempts {
            let id = ClientId::new((self.generate_id)());
            if clients.contains_key(&id) {
                debug!("Client id collision on attempt {}", attempt);
                continue;
            }

            clients.insert(id.clone(), channel);
            info!("{} registered ({} live)", id, clients.len());
            return Ok(id);
        }

        warn!(
            "Could not generate a client id after {} attempts",
            self.max_attempts
        );
        Err(RelayError::IdentityExhausted)
    }

    /// Drop the binding for `client_id`; no-op when absent
    pub fn unregister(&self, client_id: &ClientId) -> Option<ClientChannel> {
        let removed = self.clients.write().remove(client_id);
        if removed.is_some() {
            info!("{} unregistered", client_id);
        }
        removed
    }

    pub fn channel_of(&self, client_id: &ClientId) -> Option<ClientChannel> {
        self.clients.read().get(client_id).cloned()
    }

    /// Reverse lookup by channel identity
    pub fn id_of(&self, channel: &ClientChannel) -> Option<ClientId> {
        self.clients
            .read()
            .iter()
            .find(|(_, tx)| tx.same_channel(channel))
            .map(|(id, _)| id.clone())
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.read().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Queue `message` for `client_id` without waiting
    ///
    /// Returns `false` when the client is gone or its buffer is full.
    pub fn send(&self, client_id: &ClientId, message: ServerMessage) -> bool {
        let Some(channel) = self.channel_of(client_id) else {
            debug!("{} is gone, dropping message", client_id);
            return false;
        };

        match channel.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("{} outbound buffer full, dropping message", client_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{} channel closed, dropping message", client_id);
                false
            }
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ID_ATTEMPTS)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_register_and_lookup() {
        let registry = ClientRegistry::default();
        let (tx, _rx) = mpsc::channel(8);

        let id = registry.register(tx.clone()).unwrap();
        assert_eq!(registry.id_of(&tx), Some(id.clone()));
        assert!(registry.channel_of(&id).unwrap().same_channel(&tx));

        registry.unregister(&id);
        assert!(registry.channel_of(&id).is_none());
        assert!(registry.id_of(&tx).is_none());
        // Idempotent
        assert!(registry.unregister(&id).is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ClientRegistry::default();
        let mut seen = HashSet::new();
        let mut receivers = Vec::new();
        for _ in 0..100 {
            let (tx, rx) = mpsc::channel(1);
            receivers.push(rx);
            assert!(seen.insert(registry.register(tx).unwrap()));
        }
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn test_collision_retries_then_exhausts() {
        let registry = ClientRegistry::with_id_generator(10, || "fixed".to_string());
        let (tx, _rx) = mpsc::channel(1);

        assert_eq!(registry.register(tx.clone()).unwrap(), ClientId::new("fixed"));
        assert_eq!(registry.register(tx), Err(RelayError::IdentityExhausted));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_collision_resolved_on_retry() {
        let counter = std::sync::atomic::AtomicUsize::new(0);
        // "a", "a", "b", ...
        let registry = ClientRegistry::with_id_generator(3, move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < 2 { "a".to_string() } else { format!("b{}", n) }
        });
        let (tx, _rx) = mpsc::channel(1);

        assert_eq!(registry.register(tx.clone()).unwrap(), ClientId::new("a"));
        assert_eq!(registry.register(tx).unwrap(), ClientId::new("b2"));
    }

    #[test]
    fn test_send_drops_when_full() {
        let registry = ClientRegistry::default();
        let (tx, mut rx) = mpsc::channel(1);
        let id = registry.register(tx).unwrap();

        assert!(registry.send(&id, ServerMessage::error("one")));
        assert!(!registry.send(&id, ServerMessage::error("two")));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::error("one"));

        assert!(!registry.send(&ClientId::new("ghost"), ServerMessage::error("x")));
    }
}
