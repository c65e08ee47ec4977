use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use notifications_push::queue::{
    MessageConsumer, MessageHandler, ProxyConsumer, ProxyConsumerConfig, QueueError, QueueMessage,
};

/// In-process stand-in for a Kafka REST proxy.
#[derive(Default)]
struct MockProxy {
    pending: Mutex<Vec<String>>,
    created: AtomicUsize,
    fetches: AtomicUsize,
    commits: AtomicUsize,
    deletes: AtomicUsize,
    lose_instance: bool,
    /// How long the proxy takes to answer an instance creation.
    create_delay: Duration,
}

async fn create_instance(
    State(proxy): State<Arc<MockProxy>>,
    Path(group): Path<String>,
) -> Json<serde_json::Value> {
    let n = proxy.created.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(proxy.create_delay).await;
    Json(serde_json::json!({
        "instance_id": format!("instance-{n}"),
        "base_uri": format!("http://internal-host/consumers/{group}/instances/instance-{n}"),
    }))
}

async fn fetch_records(
    State(proxy): State<Arc<MockProxy>>,
    Path((_group, _id, _topic)): Path<(String, String, String)>,
) -> Response {
    proxy.fetches.fetch_add(1, Ordering::SeqCst);
    if proxy.lose_instance {
        return (StatusCode::NOT_FOUND, "Consumer instance not found").into_response();
    }
    let records: Vec<serde_json::Value> = proxy
        .pending
        .lock()
        .drain(..)
        .map(|raw| {
            serde_json::json!({
                "key": null,
                "value": base64::engine::general_purpose::STANDARD.encode(raw),
                "partition": 0,
                "offset": 1,
            })
        })
        .collect();
    Json(records).into_response()
}

async fn commit_offsets(
    State(proxy): State<Arc<MockProxy>>,
    Path((_group, _id)): Path<(String, String)>,
) -> StatusCode {
    proxy.commits.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn delete_instance(
    State(proxy): State<Arc<MockProxy>>,
    Path((_group, _id)): Path<(String, String)>,
) -> StatusCode {
    proxy.deletes.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn serve(proxy: Arc<MockProxy>) -> String {
    let app = Router::new()
        .route("/consumers/{group}", post(create_instance))
        .route(
            "/consumers/{group}/instances/{id}",
            axum::routing::delete(delete_instance),
        )
        .route(
            "/consumers/{group}/instances/{id}/topics/{topic}",
            get(fetch_records),
        )
        .route("/consumers/{group}/instances/{id}/offsets", post(commit_offsets))
        .with_state(proxy);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct ForwardingHandler(mpsc::UnboundedSender<QueueMessage>);

impl MessageHandler for ForwardingHandler {
    fn on_message(&self, msg: QueueMessage) {
        let _ = self.0.send(msg);
    }
}

fn consumer_config(addrs: Vec<String>, autocommit: bool) -> ProxyConsumerConfig {
    ProxyConsumerConfig {
        addrs,
        group: "notifications-push".to_string(),
        topic: "CmsPublicationEvents".to_string(),
        queue_host: String::new(),
        authorization_key: String::new(),
        autocommit,
        backoff: Duration::from_millis(50),
    }
}

// --- Consuming ---

#[tokio::test]
async fn consumes_decodes_commits_and_cleans_up() {
    let proxy = Arc::new(MockProxy::default());
    proxy
        .pending
        .lock()
        .push("FTMSG/1.0\r\nX-Request-Id: tid_queue\r\n\r\n{\"contentUri\": \"x\"}".to_string());
    let addr = serve(Arc::clone(&proxy)).await;

    let (errors_tx, _errors_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(ProxyConsumer::new(consumer_config(vec![addr], false), errors_tx).unwrap());
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();

    let running = Arc::clone(&consumer);
    let task = tokio::spawn(async move {
        running
            .start(Arc::new(ForwardingHandler(msg_tx)))
            .await
    });

    let msg = tokio::time::timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.transaction_id(), "tid_queue");
    assert_eq!(msg.body, "{\"contentUri\": \"x\"}");

    // The commit follows the hand-off; let it land before stopping.
    tokio::time::timeout(Duration::from_secs(5), async {
        while proxy.commits.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    consumer.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(proxy.created.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.commits.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn autocommit_skips_offset_commit() {
    let proxy = Arc::new(MockProxy::default());
    proxy
        .pending
        .lock()
        .push("FTMSG/1.0\nX-Request-Id: tid_auto\n\n{}".to_string());
    let addr = serve(Arc::clone(&proxy)).await;

    let (errors_tx, _errors_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(ProxyConsumer::new(consumer_config(vec![addr], true), errors_tx).unwrap());
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();

    let running = Arc::clone(&consumer);
    let task = tokio::spawn(async move { running.start(Arc::new(ForwardingHandler(msg_tx))).await });

    tokio::time::timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .unwrap()
        .unwrap();
    consumer.stop();
    task.await.unwrap();

    assert_eq!(proxy.commits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_before_start_returns_immediately() {
    let (errors_tx, _errors_rx) = mpsc::unbounded_channel();
    let consumer = ProxyConsumer::new(
        consumer_config(vec!["http://127.0.0.1:9".to_string()], true),
        errors_tx,
    )
    .unwrap();
    let (msg_tx, _msg_rx) = mpsc::unbounded_channel();

    consumer.stop();
    tokio::time::timeout(
        Duration::from_secs(5),
        consumer.start(Arc::new(ForwardingHandler(msg_tx))),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn stop_during_instance_creation_still_deletes_it() {
    let proxy = Arc::new(MockProxy {
        create_delay: Duration::from_millis(300),
        ..MockProxy::default()
    });
    let addr = serve(Arc::clone(&proxy)).await;

    let (errors_tx, _errors_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(ProxyConsumer::new(consumer_config(vec![addr], true), errors_tx).unwrap());
    let (msg_tx, _msg_rx) = mpsc::unbounded_channel();

    let running = Arc::clone(&consumer);
    let task = tokio::spawn(async move { running.start(Arc::new(ForwardingHandler(msg_tx))).await });

    // Stop while the proxy is still answering the create request.
    tokio::time::timeout(Duration::from_secs(5), async {
        while proxy.created.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    consumer.stop();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(proxy.created.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.fetches.load(Ordering::SeqCst), 0);
}

// --- Errors ---

#[tokio::test]
async fn lost_instance_is_reported_as_fatal() {
    let proxy = Arc::new(MockProxy {
        lose_instance: true,
        ..MockProxy::default()
    });
    let addr = serve(Arc::clone(&proxy)).await;

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(ProxyConsumer::new(consumer_config(vec![addr], true), errors_tx).unwrap());
    let (msg_tx, _msg_rx) = mpsc::unbounded_channel();

    let running = Arc::clone(&consumer);
    let task = tokio::spawn(async move { running.start(Arc::new(ForwardingHandler(msg_tx))).await });

    let err = tokio::time::timeout(Duration::from_secs(5), errors_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(err, QueueError::InstanceLost { .. }));
    assert!(err.is_fatal());

    consumer.stop();
    task.await.unwrap();
    assert!(proxy.fetches.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn unreachable_proxies_are_reported_as_fatal() {
    // Bind then release a port so nothing is listening on it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(ProxyConsumer::new(consumer_config(vec![addr], true), errors_tx).unwrap());
    let (msg_tx, _msg_rx) = mpsc::unbounded_channel();

    let running = Arc::clone(&consumer);
    let task = tokio::spawn(async move { running.start(Arc::new(ForwardingHandler(msg_tx))).await });

    let mut saw_unreachable = false;
    for _ in 0..2 {
        let err = tokio::time::timeout(Duration::from_secs(5), errors_rx.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(err, QueueError::Unreachable) {
            saw_unreachable = true;
        }
    }
    assert!(saw_unreachable);

    consumer.stop();
    task.await.unwrap();
}
