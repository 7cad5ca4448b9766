// src/domain/listener.rs

//! Listener traits exposed to applications.
//!
//! Listeners are registered on the [`Publisher`](crate::Publisher) and are
//! invoked on the publisher's dispatch pool, never on the provider's callback
//! path. Each invocation is an independent task: a slow or panicking listener
//! delays or affects no other listener.

use std::sync::Arc;

use crate::MessageId;

/// Receives transport connection lifecycle events.
#[async_trait::async_trait]
pub trait ConnectionListener: Send + Sync {
    /// The transport was closed on purpose.
    async fn on_disconnected(&self) {}

    /// The transport lost its connection unexpectedly.
    async fn on_connection_lost(&self) {}

    /// The transport (re)established its connection.
    async fn on_connection_established(&self) {}
}

/// Receives confirmations for messages sent by this publisher.
#[async_trait::async_trait]
pub trait DeliveryListener: Send + Sync {
    async fn on_message_confirmed(&self, message_id: MessageId);
}

pub type ConnectionListenerPtr = Arc<dyn ConnectionListener>;
pub type DeliveryListenerPtr = Arc<dyn DeliveryListener>;
