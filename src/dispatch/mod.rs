// Dispatch broker: subscriber registry, delayed fan-out, heartbeats, history.
//
// The `Dispatcher` trait is the seam between the broker and its callers
// (queue handler, HTTP handlers, lifecycle coordinator). `DelayedDispatcher`
// is the in-process implementation; tests substitute their own.

use std::sync::Arc;

use async_trait::async_trait;

pub mod dispatcher;
pub mod history;
pub mod notification;
pub mod subscriber;

pub use dispatcher::DelayedDispatcher;
pub use history::History;
pub use notification::{ChangeType, Notification, Standout};
pub use subscriber::{Subscriber, SubscriberKind};

/// Adds and removes subscribers. Called once per streaming connection.
pub trait Registrar: Send + Sync {
    /// Add `subscriber` to the registry. Its first queued message is a heartbeat.
    fn register(&self, subscriber: Arc<Subscriber>);

    /// Remove `subscriber` from the registry.
    fn close(&self, subscriber: &Subscriber);
}

/// Forwards notifications to registered subscribers.
#[async_trait]
pub trait Dispatcher: Registrar {
    /// Run the broadcast loop until `stop` is called. Spawn it as a background task.
    async fn start(&self);

    /// Signal the broadcast loop to end.
    fn stop(&self);

    /// Queue a batch for delivery after the configured delay. Never blocks.
    fn send(&self, notifications: Vec<Notification>);

    /// Snapshot of the registered subscribers.
    fn subscribers(&self) -> Vec<Arc<Subscriber>>;
}
