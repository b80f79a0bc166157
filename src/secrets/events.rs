//! Lease lifecycle events and listener registration.
//!
//! Listeners are plain closures keyed by a [`ListenerId`]. They are invoked on the
//! thread that produced the event (a renewal task, or the caller of `start`/`destroy`),
//! so they must be cheap and must not block.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::error::SecretsError;
use super::lease::Lease;
use super::requested::RequestedSecret;

/// Handle returned when registering a listener; pass it back to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Something that happened to a requested secret's lease.
#[derive(Debug, Clone)]
pub enum SecretLeaseEvent {
    /// A secret was fetched (initially or by rotation); carries the flattened data.
    Created { requested: RequestedSecret, lease: Lease, data: BTreeMap<String, String> },
    /// A lease was renewed.
    AfterRenewed { requested: RequestedSecret, lease: Lease },
    /// The lease is about to be revoked.
    BeforeRevocation { requested: RequestedSecret, lease: Lease },
    /// The revoke call completed.
    AfterRevocation { requested: RequestedSecret, lease: Lease },
    /// The lease reached its maximum TTL and will not be renewed again.
    Expired { requested: RequestedSecret, lease: Lease },
    /// The secret does not exist at the requested path.
    NotFound { requested: RequestedSecret },
}

impl SecretLeaseEvent {
    pub fn requested(&self) -> &RequestedSecret {
        match self {
            Self::Created { requested, .. }
            | Self::AfterRenewed { requested, .. }
            | Self::BeforeRevocation { requested, .. }
            | Self::AfterRevocation { requested, .. }
            | Self::Expired { requested, .. }
            | Self::NotFound { requested } => requested,
        }
    }
}

/// A failure while fetching, renewing, rotating, or revoking a requested secret.
#[derive(Debug, Clone)]
pub struct SecretLeaseError {
    pub requested: RequestedSecret,
    /// The lease being worked on; `Lease::none()` during an initial fetch.
    pub lease: Lease,
    pub error: Arc<SecretsError>,
}

/// Thread-safe set of listeners for one event type.
pub struct ListenerRegistry<E> {
    listeners: DashMap<ListenerId, Arc<dyn Fn(&E) + Send + Sync>>,
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self { listeners: DashMap::new() }
    }

    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Returns `true` if the listener was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn emit(&self, event: &E) {
        // Snapshot first so listeners may (un)register without deadlocking the map.
        let listeners: Vec<_> = self.listeners.iter().map(|entry| entry.value().clone()).collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
