// Dependency health checks behind `/__health` and `/__gtg`.
//
// The only dependency is the queue proxy. It counts as reachable when any
// configured proxy answers `GET {addr}/topics` with 200 and a JSON list
// that contains our topic.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::queue::ProxyConsumerConfig;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// `Ok` when the queue proxy can serve our topic, otherwise a summary
    /// of what went wrong for each address.
    async fn queue_proxy_reachable(&self) -> Result<()>;
}

pub struct ProxyHealthCheck {
    client: reqwest::Client,
    config: ProxyConsumerConfig,
}

impl ProxyHealthCheck {
    pub fn new(config: ProxyConsumerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CHECK_TIMEOUT)
            .build()
            .context("Failed to build health check HTTP client")?;
        Ok(Self { client, config })
    }

    async fn check_address(&self, addr: &str) -> Result<()> {
        let url = format!("{}/topics", addr.trim_end_matches('/'));
        let mut req = self.client.get(&url);
        if !self.config.authorization_key.is_empty() {
            req = req.header(reqwest::header::AUTHORIZATION, &self.config.authorization_key);
        }
        if !self.config.queue_host.is_empty() {
            req = req.header(reqwest::header::HOST, &self.config.queue_host);
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Could not connect to proxy {addr}"))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            anyhow::bail!("Proxy returned status: {}", status.as_u16());
        }

        let topics: Vec<String> = response
            .json()
            .await
            .context("Proxy topic list is not a JSON string array")?;
        topic_present(&topics, &self.config.topic)
    }
}

#[async_trait]
impl HealthCheck for ProxyHealthCheck {
    async fn queue_proxy_reachable(&self) -> Result<()> {
        if self.config.addrs.is_empty() {
            anyhow::bail!("No queue proxy addresses configured");
        }

        let mut failures = Vec::new();
        for addr in &self.config.addrs {
            match self.check_address(addr).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(proxy = %addr, error = %e, "Queue proxy health check failed");
                    failures.push(format!("For {addr} there is an error {e:#}"));
                }
            }
        }
        anyhow::bail!(failures.join("\n"))
    }
}

fn topic_present(topics: &[String], topic: &str) -> Result<()> {
    if topics.iter().any(|t| t == topic) {
        Ok(())
    } else {
        anyhow::bail!("Topic {topic:?} was not found")
    }
}
