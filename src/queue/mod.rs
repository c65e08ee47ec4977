// Message-queue client surface.
//
// The broker only needs two seams from the queue: something that consumes
// messages and hands each one to a `MessageHandler`, and a stop signal.
// `ProxyConsumer` implements this against a Kafka REST proxy.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod message;
pub mod proxy;

pub use message::{parse_ft_message, QueueMessage, TRANSACTION_ID_HEADER};
pub use proxy::{ProxyConsumer, ProxyConsumerConfig};

/// Errors raised by the queue client.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("request to queue proxy {addr} failed: {source}")]
    Transport {
        addr: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("queue proxy {addr} returned {status}: {body}")]
    UnexpectedStatus {
        addr: String,
        status: u16,
        body: String,
    },

    #[error("consumer instance {base_uri} no longer exists")]
    InstanceLost { base_uri: String },

    #[error("no queue proxy is reachable")]
    Unreachable,

    #[error("undecodable queue record: {0}")]
    Decode(String),
}

impl QueueError {
    /// Errors after which this process can no longer consume reliably.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::InstanceLost { .. } | QueueError::Unreachable)
    }
}

/// Receives every message consumed from the queue.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, msg: QueueMessage);
}

/// A queue consumer that runs until stopped.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Consume messages, passing each to `handler`, until `stop` is called.
    async fn start(&self, handler: Arc<dyn MessageHandler>);

    /// Signal the consume loop to end.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(QueueError::Unreachable.is_fatal());
        assert!(QueueError::InstanceLost {
            base_uri: "http://proxy/consumers/g/instances/i".to_string()
        }
        .is_fatal());
        assert!(!QueueError::Decode("bad".to_string()).is_fatal());
        assert!(!QueueError::UnexpectedStatus {
            addr: "http://proxy".to_string(),
            status: 500,
            body: String::new(),
        }
        .is_fatal());
    }
}
