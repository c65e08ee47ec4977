// Queue handler: the filter/map pipeline between the queue and the broker.
//
// Each message passes, in order: synthetic tid, carousel tid, JSON parse,
// whitelist, UUID extraction and mapping. The first failing step stops
// the message; nothing partial is dispatched.

use std::sync::Arc;

use regex_lite::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::event::{PublicationEvent, SkipReason, TransactionFilter};
use super::mapper::{MapError, NotificationMapper};
use crate::cache::NotificationCache;
use crate::dispatch::Dispatcher;
use crate::queue::{MessageHandler, QueueMessage};

/// Header carrying the publish time, used when the event has no lastModified.
const MESSAGE_TIMESTAMP_HEADER: &str = "Message-Timestamp";

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("malformed publication event: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Map(#[from] MapError),
}

/// What happened to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dispatched,
    Skipped(SkipReason),
}

pub struct QueueHandler {
    whitelist: Regex,
    filter: TransactionFilter,
    mapper: NotificationMapper,
    dispatcher: Arc<dyn Dispatcher>,
    cache: Option<Arc<NotificationCache>>,
}

impl QueueHandler {
    pub fn new(
        whitelist: Regex,
        filter: TransactionFilter,
        mapper: NotificationMapper,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            whitelist,
            filter,
            mapper,
            dispatcher,
            cache: None,
        }
    }

    /// Also record accepted notifications in the polling cache.
    pub fn with_cache(mut self, cache: Arc<NotificationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn handle_message(&self, msg: &QueueMessage) -> Result<Disposition, HandleError> {
        let tid = msg.transaction_id();

        if let Some(reason) = self.filter.skip_reason(tid) {
            info!(transaction_id = %tid, reason = ?reason, "Skipping event");
            return Ok(Disposition::Skipped(reason));
        }

        let event: PublicationEvent = serde_json::from_str(&msg.body)?;

        if !event.matches(&self.whitelist) {
            info!(
                transaction_id = %tid,
                content_uri = %event.content_uri,
                "Skipping event: not in the whitelist"
            );
            return Ok(Disposition::Skipped(SkipReason::NotWhitelisted));
        }

        let mut notification = self.mapper.map_notification(&event, tid)?;
        if notification.last_modified.is_empty() {
            if let Some(ts) = msg.header(MESSAGE_TIMESTAMP_HEADER) {
                notification.last_modified = ts.to_string();
            }
        }

        info!(
            transaction_id = %tid,
            resource = %notification.api_url,
            "Valid notification received"
        );

        if let Some(cache) = &self.cache {
            let outcome = cache.enqueue(notification.clone());
            debug!(id = %notification.id, outcome = ?outcome, "Polling cache updated");
        }
        self.dispatcher.send(vec![notification]);

        Ok(Disposition::Dispatched)
    }
}

impl MessageHandler for QueueHandler {
    fn on_message(&self, msg: QueueMessage) {
        if let Err(e) = self.handle_message(&msg) {
            warn!(
                transaction_id = %msg.transaction_id(),
                body = %msg.body,
                error = %e,
                "Skipping event"
            );
        }
    }
}
