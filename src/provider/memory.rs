// src/provider/memory.rs

//! In-memory transport provider.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`Provider`] trait. It is intended for tests, local execution and as the
//! reference for provider semantics.
//!
//! ## Reference Semantics
//!
//! - `send()` records the message and returns a fresh [`MessageId`]
//!   immediately; nothing is confirmed until a `fire_message_confirmed`
//!   call says so.
//! - Observers attached with `attach_observer()` receive every later
//!   lifecycle and confirmation event, synchronously, on the caller's thread.
//! - `connect()` and `disconnect()` flip the connection flag and raise the
//!   matching lifecycle callback.
//!
//! ## Non-Goals
//!
//! Persistence, network behaviour and broker acknowledgement timing are not
//! emulated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    // ---
    MessageId,
    ObserverPtr,
    OutboundMessage,
    Provider,
    ProviderBase,
    PublishError,
    Result,
};

/// One message accepted by [`MemoryProvider::send`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub message: OutboundMessage,
}

/// In-memory provider recording everything it is asked to send.
pub struct MemoryProvider {
    // ---
    base: ProviderBase,
    connected: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<SentMessage>>,
    observers: Mutex<Vec<ObserverPtr>>,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryProvider {
    /// Create a provider with default device name and topic.
    pub fn new(pid: impl Into<String>) -> Arc<Self> {
        // ---
        Self::with_base(ProviderBase::new(pid, "memory-device", "telemetry/data"))
    }

    /// Create a provider with explicit identity fields.
    pub fn with_base(base: ProviderBase) -> Arc<Self> {
        // ---
        crate::log_debug!("{}: create memory provider", base.pid);

        Arc::new(Self {
            base,
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Make every later `send()` fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        lock_ignore_poison(&self.sent).clone()
    }

    pub fn observer_count(&self) -> usize {
        lock_ignore_poison(&self.observers).len()
    }

    fn observers(&self) -> Vec<ObserverPtr> {
        lock_ignore_poison(&self.observers).clone()
    }

    pub fn fire_connection_established(&self) {
        self.connected.store(true, Ordering::SeqCst);
        for observer in self.observers() {
            observer.on_connection_established();
        }
    }

    pub fn fire_connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for observer in self.observers() {
            observer.on_connection_lost();
        }
    }

    pub fn fire_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for observer in self.observers() {
            observer.on_disconnected();
        }
    }

    pub fn fire_message_confirmed(&self, message_id: &MessageId, topic: &str) {
        for observer in self.observers() {
            observer.on_message_confirmed(message_id, topic);
        }
    }
}

#[async_trait::async_trait]
impl Provider for MemoryProvider {
    // ---
    fn base(&self) -> &ProviderBase {
        &self.base
    }

    async fn send(&self, message: OutboundMessage) -> Result<MessageId> {
        // ---
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PublishError::Provider(format!(
                "{}: send rejected",
                self.base.pid
            )));
        }

        let message_id = MessageId::generate();
        crate::log_debug!(
            "{}: send {} bytes to {} as {message_id}",
            self.base.pid,
            message.payload.len(),
            message.routing.app_topic
        );

        lock_ignore_poison(&self.sent).push(SentMessage {
            message_id: message_id.clone(),
            message,
        });
        Ok(message_id)
    }

    async fn connect(&self) -> Result<()> {
        self.fire_connection_established();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.fire_disconnected();
        Ok(())
    }

    fn attach_observer(&self, observer: ObserverPtr) {
        let mut observers = lock_ignore_poison(&self.observers);
        if !observers.iter().any(|o| crate::domain::same_object(o, &observer)) {
            observers.push(observer);
        }
    }

    fn detach_observer(&self, observer: &ObserverPtr) {
        lock_ignore_poison(&self.observers).retain(|o| !crate::domain::same_object(o, observer));
    }
}
