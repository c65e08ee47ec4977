// Kafka REST proxy consumer.
//
// One polling task per proxy address. Each task owns a consumer instance
// on its proxy:
//
//   POST   {addr}/consumers/{group}                    create instance
//   GET    {addr}/consumers/{group}/instances/{id}/topics/{topic}
//   POST   {addr}/consumers/{group}/instances/{id}/offsets   (auto-commit off)
//   DELETE {addr}/consumers/{group}/instances/{id}
//
// Record values are base64 encoded framed messages. Any error deletes the
// instance, is forwarded to the supervisor channel, and is followed by a
// backoff before a new instance is created.
//
// Stop interrupts fetches and pauses but never instance creation, so every
// instance created on a proxy is deleted before the task returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::message::parse_ft_message;
use super::{MessageConsumer, MessageHandler, QueueError, QueueMessage};

const KAFKA_V1_JSON: &str = "application/vnd.kafka.v1+json";
const KAFKA_BINARY_V1_JSON: &str = "application/vnd.kafka.binary.v1+json";

/// Pause between polls that returned no records.
const EMPTY_POLL_PAUSE: Duration = Duration::from_millis(500);

/// Per-request timeout for proxy calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for `ProxyConsumer`.
#[derive(Debug, Clone)]
pub struct ProxyConsumerConfig {
    /// Proxy base URLs, e.g. `http://kafka-rest-proxy:8080`.
    pub addrs: Vec<String>,
    pub group: String,
    pub topic: String,
    /// Sent as the `Host` header when non-empty.
    pub queue_host: String,
    /// Sent as the `Authorization` header when non-empty.
    pub authorization_key: String,
    pub autocommit: bool,
    pub backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct CreatedInstance {
    instance_id: String,
}

#[derive(Debug, Deserialize)]
struct ProxyRecord {
    #[serde(default)]
    value: Option<String>,
}

pub struct ProxyConsumer {
    config: ProxyConsumerConfig,
    client: reqwest::Client,
    errors: mpsc::UnboundedSender<QueueError>,
    unreachable: AtomicUsize,
    stop_tx: watch::Sender<bool>,
}

impl ProxyConsumer {
    /// Create a consumer. Errors are forwarded to `errors` for supervision.
    pub fn new(config: ProxyConsumerConfig, errors: mpsc::UnboundedSender<QueueError>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("notifications-push/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build queue proxy HTTP client")?;

        let config = ProxyConsumerConfig {
            addrs: config
                .addrs
                .iter()
                .map(|a| a.trim().trim_end_matches('/').to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            ..config
        };

        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            client,
            errors,
            unreachable: AtomicUsize::new(0),
            stop_tx,
        })
    }

    fn instance_uri(&self, addr: &str, instance_id: &str) -> String {
        format!(
            "{addr}/consumers/{}/instances/{instance_id}",
            self.config.group
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if !self.config.queue_host.is_empty() {
            req = req.header(reqwest::header::HOST, &self.config.queue_host);
        }
        if !self.config.authorization_key.is_empty() {
            req = req.header(reqwest::header::AUTHORIZATION, &self.config.authorization_key);
        }
        req
    }

    async fn send_checked(
        &self,
        addr: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, QueueError> {
        let response = req.send().await.map_err(|source| QueueError::Transport {
            addr: addr.to_string(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::UnexpectedStatus {
            addr: addr.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn create_instance(&self, addr: &str) -> Result<String, QueueError> {
        let url = format!("{addr}/consumers/{}", self.config.group);
        let body = json!({
            "auto.offset.reset": "largest",
            "auto.commit.enable": self.config.autocommit.to_string(),
        });
        let req = self
            .request(reqwest::Method::POST, &url)
            .header(reqwest::header::CONTENT_TYPE, KAFKA_V1_JSON)
            .body(body.to_string());

        let created: CreatedInstance = self
            .send_checked(addr, req)
            .await?
            .json()
            .await
            .map_err(|source| QueueError::Transport {
                addr: addr.to_string(),
                source,
            })?;

        let uri = self.instance_uri(addr, &created.instance_id);
        info!(consumer = %uri, "Created queue consumer instance");
        Ok(uri)
    }

    async fn fetch_records(&self, addr: &str, instance: &str) -> Result<Vec<ProxyRecord>, QueueError> {
        let url = format!("{instance}/topics/{}", self.config.topic);
        let req = self
            .request(reqwest::Method::GET, &url)
            .header(reqwest::header::ACCEPT, KAFKA_BINARY_V1_JSON);

        let response = self
            .send_checked(addr, req)
            .await
            .map_err(|e| lost_on_not_found(e, instance))?;
        response.json().await.map_err(|source| QueueError::Transport {
            addr: addr.to_string(),
            source,
        })
    }

    async fn commit_offsets(&self, addr: &str, instance: &str) -> Result<(), QueueError> {
        let url = format!("{instance}/offsets");
        let req = self
            .request(reqwest::Method::POST, &url)
            .header(reqwest::header::CONTENT_TYPE, KAFKA_V1_JSON);
        self.send_checked(addr, req)
            .await
            .map_err(|e| lost_on_not_found(e, instance))?;
        Ok(())
    }

    async fn delete_instance(&self, addr: &str, instance: &str) {
        let req = self
            .request(reqwest::Method::DELETE, instance)
            .header(reqwest::header::CONTENT_TYPE, KAFKA_V1_JSON);
        match self.send_checked(addr, req).await {
            Ok(_) => info!(consumer = %instance, "Deleted queue consumer instance"),
            Err(e) => warn!(consumer = %instance, error = %e, "Failed to delete queue consumer instance"),
        }
    }

    /// URI of this address's consumer instance, creating one if needed.
    async fn ensure_instance(
        &self,
        addr: &str,
        instance: &mut Option<String>,
    ) -> Result<String, QueueError> {
        if let Some(uri) = instance {
            return Ok(uri.clone());
        }
        let uri = self.create_instance(addr).await?;
        *instance = Some(uri.clone());
        Ok(uri)
    }

    /// One fetch, hand-off, commit round on an existing instance.
    /// Returns the number of records fetched.
    async fn poll_once(
        &self,
        addr: &str,
        instance: &str,
        handler: &Arc<dyn MessageHandler>,
    ) -> Result<usize, QueueError> {
        let records = self.fetch_records(addr, instance).await?;
        let fetched = records.len();
        for record in records {
            match decode_record(&record) {
                Ok(msg) => handler.on_message(msg),
                Err(e) => warn!(consumer = %instance, error = %e, "Skipping undecodable queue record"),
            }
        }

        if fetched > 0 && !self.config.autocommit {
            self.commit_offsets(addr, instance).await?;
        }
        Ok(fetched)
    }

    async fn consume_from(&self, addr: &str, handler: Arc<dyn MessageHandler>) {
        let mut stop = self.stop_tx.subscribe();
        let mut instance: Option<String> = None;
        let mut marked_unreachable = false;

        info!(proxy = %addr, topic = %self.config.topic, "Started consuming");
        loop {
            if *stop.borrow() {
                break;
            }

            // Creation is never raced against stop: once the proxy has made
            // an instance, its URI has to reach `instance` to be deleted.
            let outcome = match self.ensure_instance(addr, &mut instance).await {
                Err(e) => Err(e),
                Ok(uri) => {
                    if *stop.borrow() {
                        break;
                    }
                    tokio::select! {
                        r = self.poll_once(addr, &uri, &handler) => r,
                        _ = stop.changed() => break,
                    }
                }
            };

            let pause = match outcome {
                Ok(fetched) => {
                    if marked_unreachable {
                        marked_unreachable = false;
                        self.unreachable.fetch_sub(1, Ordering::SeqCst);
                    }
                    if fetched > 0 {
                        debug!(proxy = %addr, fetched, "Consumed queue records");
                        continue;
                    }
                    EMPTY_POLL_PAUSE
                }
                Err(e) => {
                    warn!(proxy = %addr, error = %e, "Error consuming from queue proxy");
                    if is_connect_failure(&e) && !marked_unreachable {
                        marked_unreachable = true;
                        let down = self.unreachable.fetch_add(1, Ordering::SeqCst) + 1;
                        if down >= self.config.addrs.len() {
                            self.report(QueueError::Unreachable);
                        }
                    }
                    let lost = matches!(e, QueueError::InstanceLost { .. });
                    self.report(e);
                    if let Some(uri) = instance.take() {
                        if !lost {
                            self.delete_instance(addr, &uri).await;
                        }
                    }
                    self.config.backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = stop.changed() => break,
            }
        }

        if let Some(uri) = instance.take() {
            self.delete_instance(addr, &uri).await;
        }
        info!(proxy = %addr, "Finished consuming");
    }

    fn report(&self, e: QueueError) {
        if self.errors.send(e).is_err() {
            debug!("Queue error channel closed");
        }
    }
}

#[async_trait]
impl MessageConsumer for ProxyConsumer {
    async fn start(&self, handler: Arc<dyn MessageHandler>) {
        if self.config.addrs.is_empty() {
            warn!("No queue proxy addresses configured, consuming nothing");
            let mut stop = self.stop_tx.subscribe();
            while !*stop.borrow() {
                if stop.changed().await.is_err() {
                    break;
                }
            }
            return;
        }

        join_all(
            self.config
                .addrs
                .iter()
                .map(|addr| self.consume_from(addr, Arc::clone(&handler))),
        )
        .await;
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

fn lost_on_not_found(e: QueueError, instance: &str) -> QueueError {
    match e {
        QueueError::UnexpectedStatus { status: 404, .. } => QueueError::InstanceLost {
            base_uri: instance.to_string(),
        },
        other => other,
    }
}

fn is_connect_failure(e: &QueueError) -> bool {
    matches!(e, QueueError::Transport { source, .. } if source.is_connect())
}

fn decode_record(record: &ProxyRecord) -> Result<QueueMessage, QueueError> {
    let encoded = record
        .value
        .as_deref()
        .ok_or_else(|| QueueError::Decode("record has no value".to_string()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| QueueError::Decode(e.to_string()))?;
    let raw = String::from_utf8(bytes).map_err(|e| QueueError::Decode(e.to_string()))?;
    parse_ft_message(&raw)
}
