//! Provider binder.
//!
//! Holds the single active transport binding. A watcher task consumes
//! [`RegistryEvent`]s for the configured selector and applies them to a slot
//! guarded by one mutex, so readers always see either no provider or exactly
//! one, never a half-replaced binding.
//!
//! ```text
//!            added(match)               added(other match)
//!  Unbound ───────────────▶ Bound(p) ─────────────────────▶ Bound(q)
//!     ▲                        │
//!     └──── removed(p) / close ┘
//! ```
//!
//! When the collection yields several matches the last one added wins and a
//! warning is logged.
//!
//! Every transition, including the observer attach or detach it implies,
//! runs under one transition lock. `close()` takes the same lock, so it never
//! interleaves with a half-finished bind.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::{Filter, ProviderRegistry, Registration, RegistryEvent, ServiceId};
use crate::{ObserverPtr, ProviderPtr, Result};

struct Bound {
    service_id: ServiceId,
    provider: ProviderPtr,
}

#[derive(Default)]
struct Slot {
    bound: Option<Bound>,
    /// Bumped on every bind, rebind and unbind.
    generation: u64,
    /// Bumped on every open and close; stale watcher tasks compare against it.
    epoch: u64,
    watcher: Option<JoinHandle<()>>,
}

/// Maintains at most one bound provider and its observer subscription.
pub struct ProviderBinder {
    observer: ObserverPtr,
    /// Held across slot swap plus observer attach/detach. Taken before `slot`.
    transition: Mutex<()>,
    slot: Mutex<Slot>,
    bound_tx: watch::Sender<Option<ServiceId>>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ProviderBinder {
    /// Create an unbound binder that subscribes `observer` to whichever
    /// provider it binds.
    pub fn new(observer: ObserverPtr) -> Arc<Self> {
        // ---
        let (bound_tx, _) = watch::channel(None);
        Arc::new(Self {
            observer,
            transition: Mutex::new(()),
            slot: Mutex::new(Slot::default()),
            bound_tx,
        })
    }

    /// Start watching `registry` for the provider whose pid is `pid`.
    ///
    /// Any previous watch is closed first. A selector that does not form a
    /// valid filter is logged and returned as
    /// [`PublishError::FilterSyntax`](crate::PublishError::FilterSyntax); the
    /// binder then stays unbound with no watch open.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(self: &Arc<Self>, registry: &ProviderRegistry, pid: &str) -> Result<()> {
        // ---
        self.close();

        let filter = match Filter::for_provider(pid) {
            Ok(f) => f,
            Err(e) => {
                crate::log_error!("binder: provider filter setup failed: {e}");
                return Err(e);
            }
        };
        crate::log_debug!("binder: watching {filter}");

        let mut watch = registry.watch(filter);
        let mut slot = lock_ignore_poison(&self.slot);
        let epoch = slot.epoch;
        let binder: Weak<Self> = Arc::downgrade(self);

        slot.watcher = Some(tokio::spawn(async move {
            // ---
            while let Some(event) = watch.recv().await {
                let Some(binder) = binder.upgrade() else {
                    break;
                };
                binder.apply(epoch, event);
            }
            crate::log_debug!("binder: watch closed");
        }));

        Ok(())
    }

    /// Stop watching and drop the current binding.
    pub fn close(&self) {
        // ---
        let _transition = lock_ignore_poison(&self.transition);
        let (released, watcher) = {
            let mut slot = lock_ignore_poison(&self.slot);
            slot.epoch += 1;
            let released = slot.bound.take();
            if released.is_some() {
                slot.generation += 1;
            }
            (released, slot.watcher.take())
        };

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        if let Some(bound) = released {
            crate::log_info!("binder: unbound {} (watch closed)", bound.provider.pid());
            bound.provider.detach_observer(&self.observer);
            self.bound_tx.send_replace(None);
        }
    }

    /// The currently bound provider, if any.
    pub fn current(&self) -> Option<ProviderPtr> {
        lock_ignore_poison(&self.slot)
            .bound
            .as_ref()
            .map(|b| b.provider.clone())
    }

    /// Registry id of the currently bound provider, if any.
    pub fn bound_service_id(&self) -> Option<ServiceId> {
        lock_ignore_poison(&self.slot)
            .bound
            .as_ref()
            .map(|b| b.service_id)
    }

    /// Number of binding transitions so far.
    pub fn generation(&self) -> u64 {
        lock_ignore_poison(&self.slot).generation
    }

    pub fn is_watching(&self) -> bool {
        lock_ignore_poison(&self.slot).watcher.is_some()
    }

    /// Wait until a provider is bound, or `timeout` elapses.
    pub async fn wait_bound(&self, timeout: Duration) -> bool {
        // ---
        let mut rx = self.bound_tx.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|id| id.is_some())).await;
        matches!(waited, Ok(Ok(_)))
    }

    fn apply(&self, epoch: u64, event: RegistryEvent) {
        // ---
        match event {
            RegistryEvent::Added(reg) => self.on_provider_added(epoch, reg),
            RegistryEvent::Removed(reg) => self.on_provider_removed(epoch, reg),
            RegistryEvent::Modified(reg) => {
                crate::log_debug!("binder: service {} modified", reg.service_id);
            }
        }
    }

    /// A matching provider appeared: bind it, replacing any current binding.
    fn on_provider_added(&self, epoch: u64, reg: Registration) {
        // ---
        let _transition = lock_ignore_poison(&self.transition);
        let replaced = {
            let mut slot = lock_ignore_poison(&self.slot);
            if slot.epoch != epoch {
                return;
            }
            if slot.bound.as_ref().map(|b| b.service_id) == Some(reg.service_id) {
                return;
            }
            slot.generation += 1;
            slot.bound.replace(Bound {
                service_id: reg.service_id,
                provider: reg.provider.clone(),
            })
        };

        if let Some(old) = replaced {
            crate::log_warn!(
                "binder: selector matched another provider; replacing {} (service {}) with {} (service {})",
                old.provider.pid(),
                old.service_id,
                reg.provider.pid(),
                reg.service_id
            );
            old.provider.detach_observer(&self.observer);
        } else {
            crate::log_info!("binder: bound {} (service {})", reg.provider.pid(), reg.service_id);
        }

        reg.provider.attach_observer(self.observer.clone());
        self.bound_tx.send_replace(Some(reg.service_id));
    }

    /// A matching provider went away: unbind it if it is the bound one.
    fn on_provider_removed(&self, epoch: u64, reg: Registration) {
        // ---
        let _transition = lock_ignore_poison(&self.transition);
        let released = {
            let mut slot = lock_ignore_poison(&self.slot);
            if slot.epoch != epoch {
                return;
            }
            if slot.bound.as_ref().map(|b| b.service_id) != Some(reg.service_id) {
                return;
            }
            slot.generation += 1;
            slot.bound.take()
        };

        if let Some(bound) = released {
            crate::log_info!("binder: unbound {} (service {})", bound.provider.pid(), bound.service_id);
            bound.provider.detach_observer(&self.observer);
            self.bound_tx.send_replace(None);
        }
    }
}

impl Drop for ProviderBinder {
    fn drop(&mut self) {
        self.close();
    }
}
