//! Watched collection of candidate transport providers.
//!
//! The registry is the discovery side of provider binding. Components that
//! implement [`Provider`] register themselves with a property set;
//! consumers open a [`Watch`] with a [`Filter`] and receive
//! [`RegistryEvent`]s for matching registrations.
//!
//! ## Semantics
//!
//! - Opening a watch replays every current match as [`RegistryEvent::Added`]
//!   before any later change is delivered.
//! - `modify()` re-evaluates the filter: a registration that keeps matching
//!   is reported as `Modified`, one that stops matching as `Removed`, one
//!   that starts matching as `Added`.
//! - Dropping a [`Watch`] unsubscribes it; closed watches are pruned on the
//!   next notification.
//!
//! All methods are synchronous and may be called from any thread.

mod filter;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;

pub use filter::Filter;

use crate::{ProviderPtr, PublishError, Result};

/// Property naming the interface a registration implements.
pub const OBJECT_CLASS: &str = "objectClass";

/// Property carrying a registration's persistent identity.
pub const SERVICE_PID: &str = "service.pid";

/// Property carrying the registry-assigned id.
pub const SERVICE_ID: &str = "service.id";

/// Interface name transport providers register under.
pub const PROVIDER_INTERFACE: &str = "cloud.connection.CloudConnectionManager";

/// Registration property set.
pub type Properties = BTreeMap<String, String>;

/// Registry-assigned identity of one registration.
pub type ServiceId = u64;

/// One provider entry in the registry.
#[derive(Clone)]
pub struct Registration {
    pub service_id: ServiceId,
    pub properties: Properties,
    pub provider: ProviderPtr,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("service_id", &self.service_id)
            .field("properties", &self.properties)
            .field("pid", &self.provider.pid())
            .finish()
    }
}

/// Change notification delivered to a [`Watch`].
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Added(Registration),
    Modified(Registration),
    Removed(Registration),
}

/// Receiving side of a registry watch.
pub struct Watch {
    filter: Filter,
    inbox: mpsc::UnboundedReceiver<RegistryEvent>,
}

impl Watch {
    /// Wait for the next matching change. `None` once the registry is gone.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        self.inbox.recv().await
    }

    /// Take a pending change without waiting.
    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        self.inbox.try_recv().ok()
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }
}

struct Watcher {
    filter: Filter,
    outbox: mpsc::UnboundedSender<RegistryEvent>,
}

#[derive(Default)]
struct RegistryState {
    next_id: ServiceId,
    entries: BTreeMap<ServiceId, Registration>,
    watchers: Vec<Watcher>,
}

impl RegistryState {
    fn notify<F>(&mut self, mut event_for: F)
    where
        F: FnMut(&Filter) -> Option<RegistryEvent>,
    {
        // ---
        self.watchers.retain(|w| {
            if w.outbox.is_closed() {
                return false;
            }
            match event_for(&w.filter) {
                Some(event) => w.outbox.send(event).is_ok(),
                None => true,
            }
        });
    }
}

/// In-process provider registry.
#[derive(Default)]
pub struct ProviderRegistry {
    state: Mutex<RegistryState>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its own pid as a transport provider.
    pub fn register_provider(&self, provider: ProviderPtr) -> ServiceId {
        // ---
        let mut props = Properties::new();
        props.insert(OBJECT_CLASS.into(), PROVIDER_INTERFACE.into());
        props.insert(SERVICE_PID.into(), provider.pid().to_string());
        self.register(props, provider)
    }

    /// Register `provider` with an explicit property set.
    ///
    /// `service.id` is always overwritten with the assigned id.
    pub fn register(&self, mut properties: Properties, provider: ProviderPtr) -> ServiceId {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.next_id += 1;
        let service_id = state.next_id;
        properties.insert(SERVICE_ID.into(), service_id.to_string());

        let registration = Registration {
            service_id,
            properties,
            provider,
        };
        crate::log_debug!(
            "registry: add service {service_id} ({})",
            registration.provider.pid()
        );

        state.entries.insert(service_id, registration.clone());
        state.notify(|filter| {
            filter
                .matches(&registration.properties)
                .then(|| RegistryEvent::Added(registration.clone()))
        });

        service_id
    }

    /// Replace the property set of an existing registration.
    pub fn modify(&self, service_id: ServiceId, mut properties: Properties) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let entry = state.entries.get_mut(&service_id).ok_or_else(|| {
            PublishError::InvalidArgument(format!("unknown service id {service_id}"))
        })?;

        properties.insert(SERVICE_ID.into(), service_id.to_string());
        let before = std::mem::replace(&mut entry.properties, properties);
        let after = entry.clone();

        state.notify(|filter| {
            match (filter.matches(&before), filter.matches(&after.properties)) {
                (true, true) => Some(RegistryEvent::Modified(after.clone())),
                (false, true) => Some(RegistryEvent::Added(after.clone())),
                (true, false) => {
                    let mut old = after.clone();
                    old.properties = before.clone();
                    Some(RegistryEvent::Removed(old))
                }
                (false, false) => None,
            }
        });

        Ok(())
    }

    /// Remove a registration. Unknown ids are ignored.
    pub fn unregister(&self, service_id: ServiceId) -> bool {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let Some(registration) = state.entries.remove(&service_id) else {
            return false;
        };
        crate::log_debug!(
            "registry: remove service {service_id} ({})",
            registration.provider.pid()
        );

        state.notify(|filter| {
            filter
                .matches(&registration.properties)
                .then(|| RegistryEvent::Removed(registration.clone()))
        });
        true
    }

    /// Open a watch for registrations matching `filter`.
    pub fn watch(&self, filter: Filter) -> Watch {
        // ---
        let (outbox, inbox) = mpsc::unbounded_channel();

        let mut state = lock_ignore_poison(&self.state);
        for registration in state.entries.values() {
            if filter.matches(&registration.properties) {
                let _ = outbox.send(RegistryEvent::Added(registration.clone()));
            }
        }
        state.watchers.push(Watcher {
            filter: filter.clone(),
            outbox,
        });

        Watch { filter, inbox }
    }

    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
