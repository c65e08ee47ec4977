// Delayed broadcast dispatcher.
//
// `send` waits the configured delay in a background task, stamps each
// notification with its dispatch time, and hands the batch to the
// broadcast loop in order. The loop has three wake-up sources:
//
//   inbound notification -> fan out to every subscriber, then record in history
//   heartbeat timer      -> queue "[]" on every subscriber
//   stop signal          -> return
//
// The heartbeat timer is reset after every iteration, so heartbeats are
// spaced relative to the last activity rather than on a fixed grid.
//
// Each delayed batch is its own sleeping tokio task, not a slot in a
// bounded pool. A sleeping task holds no thread, so the number in flight is
// the publish rate times the delay and is left uncapped; the inbound
// channel bounds what reaches the loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::history::History;
use super::notification::{notification_date_now, Notification, HEARTBEAT_MSG};
use super::subscriber::Subscriber;
use super::{Dispatcher, Registrar};

/// Capacity of the channel between delayed sends and the broadcast loop.
const INBOUND_CAPACITY: usize = 256;

/// In-process dispatcher with a fixed delay and heartbeat period.
pub struct DelayedDispatcher {
    delay: Duration,
    heartbeat_period: Duration,
    inbound_tx: mpsc::Sender<Notification>,
    /// Taken by the broadcast loop on `start`.
    inbound_rx: Mutex<Option<mpsc::Receiver<Notification>>>,
    subscribers: RwLock<BTreeMap<u64, Arc<Subscriber>>>,
    history: Arc<History>,
    stop_tx: watch::Sender<bool>,
}

impl DelayedDispatcher {
    pub fn new(delay: Duration, heartbeat_period: Duration, history: Arc<History>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            delay,
            heartbeat_period,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            subscribers: RwLock::new(BTreeMap::new()),
            history,
            stop_tx,
        }
    }

    pub fn history(&self) -> &Arc<History> {
        &self.history
    }

    fn forward_to_subscribers(&self, n: Notification) {
        info!(
            transaction_id = %n.publish_reference,
            id = %n.id,
            "Forwarding to subscribers."
        );

        {
            let subscribers = self.subscribers.read();
            for sub in subscribers.values() {
                if let Err(e) = sub.send(&n) {
                    warn!(
                        error = %e,
                        transaction_id = %n.publish_reference,
                        subscriber = %sub.address(),
                        subscriber_age = ?sub.connected_for(),
                        "Failed forwarding to subscriber."
                    );
                }
            }
        }

        self.history.push(n);
    }

    fn heartbeat(&self) {
        let subscribers = self.subscribers.read();
        for sub in subscribers.values() {
            sub.write_on_channel(HEARTBEAT_MSG.to_string());
        }
    }
}

impl Registrar for DelayedDispatcher {
    fn register(&self, subscriber: Arc<Subscriber>) {
        // Queued before insertion so nothing can overtake it.
        subscriber.write_on_channel(HEARTBEAT_MSG.to_string());

        info!(
            subscriber = %subscriber.address(),
            kind = ?subscriber.kind(),
            content_type = %subscriber.accepted_content_type(),
            "Registered new subscriber"
        );
        self.subscribers.write().insert(subscriber.id(), subscriber);
    }

    fn close(&self, subscriber: &Subscriber) {
        if self.subscribers.write().remove(&subscriber.id()).is_some() {
            info!(subscriber = %subscriber.address(), "Unregistered subscriber");
        }
    }
}

#[async_trait]
impl Dispatcher for DelayedDispatcher {
    async fn start(&self) {
        let taken = { self.inbound_rx.lock().take() };
        let Some(mut inbound) = taken else {
            warn!("Dispatcher already started");
            return;
        };

        let mut stop = self.stop_tx.subscribe();
        if *stop.borrow() {
            return;
        }

        let heartbeat = tokio::time::sleep(self.heartbeat_period);
        tokio::pin!(heartbeat);

        info!(
            delay_secs = self.delay.as_secs_f64(),
            heartbeat_secs = self.heartbeat_period.as_secs_f64(),
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                maybe = inbound.recv() => match maybe {
                    Some(n) => self.forward_to_subscribers(n),
                    None => break,
                },
                _ = &mut heartbeat => self.heartbeat(),
                _ = stop.changed() => break,
            }

            heartbeat.as_mut().reset(Instant::now() + self.heartbeat_period);
        }

        info!("Dispatcher stopped");
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    fn send(&self, notifications: Vec<Notification>) {
        for n in &notifications {
            info!(
                transaction_id = %n.publish_reference,
                id = %n.id,
                "Received notification. Waiting configured delay ({:?}).",
                self.delay
            );
        }

        let inbound = self.inbound_tx.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for mut n in notifications {
                n.notification_date = notification_date_now();
                if inbound.send(n).await.is_err() {
                    debug!("Dispatcher gone, dropping delayed notifications");
                    return;
                }
            }
        });
    }

    fn subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.read().values().cloned().collect()
    }
}
