// Maps publication events to notifications.

use regex_lite::Regex;
use serde_json::Value;
use thiserror::Error;

use super::event::PublicationEvent;
use crate::dispatch::notification::THING_URI_PREFIX;
use crate::dispatch::{ChangeType, Notification, Standout};

const UUID_PATTERN: &str =
    "[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("content URI does not contain a UUID: {0}")]
    MissingUuid(String),
}

/// Builds `Notification`s for one resource type.
#[derive(Debug, Clone)]
pub struct NotificationMapper {
    api_base_url: String,
    resource: String,
    uuid: Regex,
}

impl NotificationMapper {
    pub fn new(api_base_url: &str, resource: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            resource: resource.to_string(),
            uuid: Regex::new(UUID_PATTERN)?,
        })
    }

    /// Map `event` to a notification. DELETE when the payload is empty,
    /// otherwise UPDATE with best-effort title, scoop and content type.
    pub fn map_notification(
        &self,
        event: &PublicationEvent,
        transaction_id: &str,
    ) -> Result<Notification, MapError> {
        let uuid = self
            .uuid
            .find(&event.content_uri)
            .map(|m| m.as_str())
            .ok_or_else(|| MapError::MissingUuid(event.content_uri.clone()))?;

        let mut notification = Notification {
            api_url: format!("{}/{}/{uuid}", self.api_base_url, self.resource),
            id: format!("{THING_URI_PREFIX}{uuid}"),
            kind: ChangeType::Delete.uri(),
            publish_reference: transaction_id.to_string(),
            last_modified: event.last_modified.clone(),
            ..Default::default()
        };

        if !event.has_empty_payload() {
            notification.kind = ChangeType::Update.uri();
            if let Some(Value::Object(payload)) = &event.payload {
                notification.title = string_field(payload.get("title"));
                notification.content_type = content_type(payload.get("type"));
                notification.standout = Standout {
                    scoop: payload
                        .get("standout")
                        .and_then(|s| s.get("scoop"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                };
            }
        }

        Ok(notification)
    }
}

fn string_field(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_string()
}

/// `http://www.ft.com/ontology/content/Article` and `Article` both give `Article`.
fn content_type(value: Option<&Value>) -> String {
    let raw = string_field(value);
    match raw.trim_end_matches('/').rsplit_once('/') {
        Some((_, last)) => last.to_string(),
        None => raw,
    }
}
