// Push service: runs the dispatcher and the queue consumer together.
//
// Start order: dispatcher loop, then consumer. Stop order: consumer, then
// dispatcher, then wait for both tasks. A message still in flight when the
// consumer stops is delivered through a dispatcher whose loop is running.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::dispatch::Dispatcher;
use crate::queue::{MessageConsumer, MessageHandler};

pub struct PushService {
    dispatcher: Arc<dyn Dispatcher>,
    consumer: Arc<dyn MessageConsumer>,
}

impl PushService {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, consumer: Arc<dyn MessageConsumer>) -> Self {
        Self {
            dispatcher,
            consumer,
        }
    }

    /// Run until `shutdown` completes, then drain.
    pub async fn run<S>(&self, handler: Arc<dyn MessageHandler>, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let dispatch_task = tokio::spawn(async move { dispatcher.start().await });

        let consumer = Arc::clone(&self.consumer);
        let consume_task = tokio::spawn(async move {
            info!("Started consuming");
            consumer.start(handler).await;
            info!("Finished consuming");
        });

        shutdown.await;
        info!("Shutting down push service");

        self.consumer.stop();
        if let Err(e) = consume_task.await {
            error!(error = %e, "Consumer task failed");
        }

        self.dispatcher.stop();
        if let Err(e) = dispatch_task.await {
            error!(error = %e, "Dispatcher task failed");
        }
        info!("Push service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Notification, Registrar, Subscriber};
    use crate::queue::QueueMessage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::watch;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct RecordingDispatcher {
        log: Log,
        stop_tx: watch::Sender<bool>,
    }

    impl Registrar for RecordingDispatcher {
        fn register(&self, _subscriber: Arc<Subscriber>) {}
        fn close(&self, _subscriber: &Subscriber) {}
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn start(&self) {
            self.log.lock().push("dispatcher started");
            let mut rx = self.stop_tx.subscribe();
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            self.log.lock().push("dispatcher finished");
        }
        fn stop(&self) {
            self.log.lock().push("dispatcher stop");
            self.stop_tx.send_replace(true);
        }
        fn send(&self, _notifications: Vec<Notification>) {}
        fn subscribers(&self) -> Vec<Arc<Subscriber>> {
            Vec::new()
        }
    }

    struct RecordingConsumer {
        log: Log,
        stop_tx: watch::Sender<bool>,
    }

    #[async_trait]
    impl MessageConsumer for RecordingConsumer {
        async fn start(&self, handler: Arc<dyn MessageHandler>) {
            self.log.lock().push("consumer started");
            handler.on_message(QueueMessage::default());
            let mut rx = self.stop_tx.subscribe();
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            self.log.lock().push("consumer finished");
        }
        fn stop(&self) {
            self.log.lock().push("consumer stop");
            self.stop_tx.send_replace(true);
        }
    }

    struct CountingHandler(Log);

    impl MessageHandler for CountingHandler {
        fn on_message(&self, _msg: QueueMessage) {
            self.0.lock().push("message");
        }
    }

    #[tokio::test]
    async fn test_stops_consumer_before_dispatcher() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(RecordingDispatcher {
            log: Arc::clone(&log),
            stop_tx: watch::channel(false).0,
        });
        let consumer = Arc::new(RecordingConsumer {
            log: Arc::clone(&log),
            stop_tx: watch::channel(false).0,
        });
        let service = PushService::new(dispatcher, consumer);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let watched = Arc::clone(&log);
        let shutdown = async move {
            // Wait until both loops are up before signalling.
            while watched.lock().len() < 3 {
                tokio::task::yield_now().await;
            }
            let _ = shutdown_rx.changed().await;
        };

        let handler = Arc::new(CountingHandler(Arc::clone(&log)));
        let run = tokio::spawn(async move { service.run(handler, shutdown).await });
        while log.lock().len() < 3 {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send_replace(true);
        run.await.unwrap();

        let log = log.lock().clone();
        let pos = |entry: &str| log.iter().position(|e| *e == entry).unwrap();
        assert!(pos("dispatcher started") < pos("consumer started"));
        assert!(pos("consumer stop") < pos("consumer finished"));
        assert!(pos("consumer finished") < pos("dispatcher stop"));
        assert!(pos("dispatcher stop") < pos("dispatcher finished"));
        assert_eq!(log.last(), Some(&"dispatcher finished"));
        assert!(log.contains(&"message"));
    }
}
