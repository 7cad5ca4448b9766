//! Listener fan-out.
//!
//! Provider callbacks arrive on the provider's own thread and must return
//! quickly. [`FanOut`] turns every callback into one job per registered
//! listener and hands the jobs to a [`DispatchPool`], whose workers start each
//! job on its own task without waiting for it. A slow listener delays nobody
//! else; a panicking listener only loses its own job.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::{
    // ---
    ConnectionListener,
    ConnectionListenerPtr,
    DeliveryListener,
    DeliveryListenerPtr,
    MessageId,
    ProviderObserver,
};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Set of listeners compared by pointer identity.
///
/// Reads take a snapshot, so the set may change while a dispatch round is
/// iterating without affecting that round.
pub struct ListenerSet<L: ?Sized> {
    items: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener`. Returns false if it was already present.
    pub fn insert(&self, listener: Arc<L>) -> bool {
        // ---
        let mut items = lock_ignore_poison(&self.items);
        if items.iter().any(|l| crate::domain::same_object(l, &listener)) {
            return false;
        }
        items.push(listener);
        true
    }

    /// Remove `listener`. Returns false if it was not present.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        // ---
        let mut items = lock_ignore_poison(&self.items);
        let before = items.len();
        items.retain(|l| !crate::domain::same_object(l, listener));
        items.len() != before
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        lock_ignore_poison(&self.items)
            .iter()
            .any(|l| crate::domain::same_object(l, listener))
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        lock_ignore_poison(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed set of worker tasks draining one unbounded job queue.
pub struct DispatchPool {
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Jobs handed off by the workers and not yet reaped.
    running: Arc<Mutex<JoinSet<()>>>,
}

impl DispatchPool {
    /// Spawn `workers` worker tasks (at least one).
    ///
    /// Workers only move jobs from the queue onto their own tasks and never
    /// wait for a job to finish.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize) -> Self {
        // ---
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let running = Arc::new(Mutex::new(JoinSet::new()));

        let handles = (0..workers.max(1))
            .map(|index| {
                let rx = rx.clone();
                let running = running.clone();
                tokio::spawn(async move {
                    // ---
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };

                        let mut running = lock_ignore_poison(&running);
                        while running.try_join_next().is_some() {}
                        running.spawn(async move {
                            if let Err(e) = tokio::spawn(job).await {
                                if e.is_panic() {
                                    crate::log_error!("dispatch worker {index}: listener panicked");
                                } else {
                                    crate::log_warn!("dispatch worker {index}: job cancelled");
                                }
                            }
                        });
                    }
                    crate::log_debug!("dispatch worker {index}: exit");
                })
            })
            .collect();

        Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            running,
        }
    }

    /// Queue `job`. Returns false once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // ---
        match lock_ignore_poison(&self.queue).as_ref() {
            Some(tx) => tx.send(Box::pin(job)).is_ok(),
            None => false,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        lock_ignore_poison(&self.queue).is_none()
    }

    /// Stop accepting jobs and wait for everything already queued to finish.
    pub async fn shutdown(&self) {
        // ---
        drop(lock_ignore_poison(&self.queue).take());

        let workers = std::mem::take(&mut *lock_ignore_poison(&self.workers));
        for worker in workers {
            if let Err(e) = worker.await {
                crate::log_error!("dispatch worker join failed: {e}");
            }
        }

        // Workers have exited, so nothing is added to the set any more.
        let mut running = std::mem::take(&mut *lock_ignore_poison(&self.running));
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                crate::log_error!("dispatch job join failed: {e}");
            }
        }
    }
}

/// Observer bound to the provider; broadcasts every event to the listeners.
pub struct FanOut {
    // ---
    app_id: RwLock<String>,
    connection: ListenerSet<dyn ConnectionListener>,
    delivery: ListenerSet<dyn DeliveryListener>,
    pool: DispatchPool,
}

impl FanOut {
    /// Must be called from within a tokio runtime.
    pub fn new(app_id: impl Into<String>, workers: usize) -> Arc<Self> {
        Arc::new(Self {
            app_id: RwLock::new(app_id.into()),
            connection: ListenerSet::new(),
            delivery: ListenerSet::new(),
            pool: DispatchPool::new(workers),
        })
    }

    /// Replace the application id used to filter confirmations.
    pub fn set_app_id(&self, app_id: impl Into<String>) {
        let mut guard = match self.app_id.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = app_id.into();
    }

    pub fn app_id(&self) -> String {
        match self.app_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn connection_listeners(&self) -> &ListenerSet<dyn ConnectionListener> {
        &self.connection
    }

    pub fn delivery_listeners(&self) -> &ListenerSet<dyn DeliveryListener> {
        &self.delivery
    }

    /// Stop accepting events and drain queued listener jobs.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn broadcast<F, Fut>(&self, event: &'static str, call: F)
    where
        F: Fn(ConnectionListenerPtr) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // ---
        let listeners = self.connection.snapshot();
        crate::log_debug!("fan-out: {event} to {} listener(s)", listeners.len());

        for listener in listeners {
            if !self.pool.submit(call(listener)) {
                crate::log_debug!("fan-out: pool closed, dropping {event}");
                return;
            }
        }
    }

    fn accepts_topic(&self, topic: &str) -> bool {
        match self.app_id.read() {
            Ok(app_id) => topic.contains(app_id.as_str()),
            Err(poisoned) => topic.contains(poisoned.into_inner().as_str()),
        }
    }
}

impl ProviderObserver for FanOut {
    fn on_disconnected(&self) {
        self.broadcast("disconnected", |l| async move { l.on_disconnected().await });
    }

    fn on_connection_lost(&self) {
        self.broadcast("connection lost", |l| async move { l.on_connection_lost().await });
    }

    fn on_connection_established(&self) {
        self.broadcast("connection established", |l| async move {
            l.on_connection_established().await
        });
    }

    fn on_message_confirmed(&self, message_id: &MessageId, topic: &str) {
        // ---
        if !self.accepts_topic(topic) {
            crate::log_debug!("fan-out: confirmation {message_id} on {topic} not ours");
            return;
        }

        let listeners: Vec<DeliveryListenerPtr> = self.delivery.snapshot();
        crate::log_debug!(
            "fan-out: confirmation {message_id} to {} listener(s)",
            listeners.len()
        );

        for listener in listeners {
            let id = message_id.clone();
            if !self
                .pool
                .submit(async move { listener.on_message_confirmed(id).await })
            {
                crate::log_debug!("fan-out: pool closed, dropping confirmation {message_id}");
                return;
            }
        }
    }
}
