//! Persistence listeners.

use std::sync::Arc;

use ormgraph_proto::Value;
use parking_lot::RwLock;

use crate::entity::Entity;

/// Callbacks around persister operations. Every method defaults to a no-op.
///
/// For polymorphic mappings, listeners registered on the root see the whole
/// batch; listeners registered on a subtype see only its instances.
pub trait PersistListener: Send + Sync {
    fn before_insert(&self, _entities: &[&Entity]) {}

    fn after_insert(&self, _entities: &[&Entity]) {}

    /// Called with (modified, reference) pairs.
    fn before_update(&self, _pairs: &[(&Entity, &Entity)]) {}

    fn after_update(&self, _pairs: &[(&Entity, &Entity)]) {}

    fn before_delete(&self, _entities: &[&Entity]) {}

    fn after_delete(&self, _entities: &[&Entity]) {}

    /// Called with the requested identifiers; empty for a full select.
    fn before_select(&self, _ids: &[Value]) {}

    fn after_select(&self, _entities: &[Entity]) {}
}

/// Listeners registered for one mapping.
#[derive(Default)]
pub struct ListenerCollection {
    listeners: RwLock<Vec<Arc<dyn PersistListener>>>,
}

impl ListenerCollection {
    pub fn add(&self, listener: Arc<dyn PersistListener>) {
        self.listeners.write().push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke `f` on every listener, in registration order.
    pub fn each(&self, f: impl Fn(&dyn PersistListener)) {
        // Listeners may register others; call outside the lock.
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for ListenerCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerCollection")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
