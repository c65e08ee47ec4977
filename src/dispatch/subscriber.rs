// Subscribers: one per open streaming connection.
//
// Standard and monitor subscribers share a single type and differ only in
// how a notification is serialized before it is queued: standard
// subscribers get publishReference and lastModified stripped, monitors get
// the full notification.
//
// Each subscriber owns the sending half of a small bounded queue. Writes
// never block: when the queue is full the message is dropped for this
// subscriber only and a warning is logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::notification::{marshal_notifications_json, Notification};

/// Capacity of each subscriber's outbound queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 16;

/// Accepted content type that matches every notification.
pub const ANY_CONTENT_TYPE: &str = "All";

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Serialization strategy of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberKind {
    Standard,
    Monitor,
}

/// One streaming client, as seen by the dispatcher.
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    kind: SubscriberKind,
    address: String,
    since: DateTime<Utc>,
    accepted_content_type: String,
    channel: mpsc::Sender<String>,
}

impl Subscriber {
    /// Create a standard subscriber. The returned receiver is the
    /// subscriber's notification channel; the HTTP handler drains it.
    pub fn standard(address: &str, accepted_content_type: &str) -> (Arc<Self>, mpsc::Receiver<String>) {
        Self::new(SubscriberKind::Standard, address, accepted_content_type)
    }

    /// Create a monitor subscriber, which receives full notification metadata.
    pub fn monitor(address: &str, accepted_content_type: &str) -> (Arc<Self>, mpsc::Receiver<String>) {
        Self::new(SubscriberKind::Monitor, address, accepted_content_type)
    }

    pub fn new(
        kind: SubscriberKind,
        address: &str,
        accepted_content_type: &str,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let subscriber = Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            address: address.to_string(),
            since: Utc::now(),
            accepted_content_type: accepted_content_type.to_string(),
            channel: tx,
        };
        (Arc::new(subscriber), rx)
    }

    /// Unique id, used as the registry key.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SubscriberKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    /// How long this subscriber has been connected.
    pub fn connected_for(&self) -> Duration {
        (Utc::now() - self.since).to_std().unwrap_or_default()
    }

    pub fn accepted_content_type(&self) -> &str {
        &self.accepted_content_type
    }

    /// Whether this subscriber wants `n`.
    ///
    /// Deletes always match, as does the `All` wildcard; otherwise the
    /// accepted type must equal the notification's content type, ignoring case.
    pub fn matches_content_type(&self, n: &Notification) -> bool {
        n.is_delete()
            || self.accepted_content_type.eq_ignore_ascii_case(ANY_CONTENT_TYPE)
            || self.accepted_content_type.eq_ignore_ascii_case(&n.content_type)
    }

    /// Serialize `n` for this subscriber and queue it, if the subscriber
    /// accepts its content type.
    ///
    /// Only a serialization failure is reported; a full queue drops the
    /// message with a warning.
    pub fn send(&self, n: &Notification) -> serde_json::Result<()> {
        if !self.matches_content_type(n) {
            return Ok(());
        }
        let msg = match self.kind {
            SubscriberKind::Standard => marshal_notifications_json(&[n.stripped()])?,
            SubscriberKind::Monitor => marshal_notifications_json(std::slice::from_ref(n))?,
        };
        self.write_on_channel(msg);
        Ok(())
    }

    /// Queue a raw message (notification JSON or heartbeat) without blocking.
    pub(crate) fn write_on_channel(&self, msg: String) {
        match self.channel.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(subscriber = %self.address, message = %msg, "Subscriber lagging behind...");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber = %self.address, "Subscriber channel closed, dropping message");
            }
        }
    }

    /// Stats view of this subscriber for `/__stats`.
    pub fn payload(&self) -> SubscriberPayload {
        let connected = self.connected_for();
        SubscriberPayload {
            address: self.address.clone(),
            since: self.since.format("%b %e %H:%M:%S%.3f").to_string(),
            connection_duration: format!("{connected:?}"),
            kind: self.kind,
            accepted_content_type: self.accepted_content_type.clone(),
        }
    }
}

/// JSON representation of a subscriber in `/__stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberPayload {
    pub address: String,
    pub since: String,
    pub connection_duration: String,
    #[serde(rename = "type")]
    pub kind: SubscriberKind,
    pub accepted_content_type: String,
}
