// Notification model: the unit pushed to subscribers, kept in history,
// and served from the polling cache.
//
// `content_type` is only used for server-side routing and is never
// serialized. Empty optional fields are omitted from the JSON.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every notification `id`; the content UUID is appended.
pub const THING_URI_PREFIX: &str = "http://www.ft.com/thing/";

/// Prefix of every notification `type`; `UPDATE` or `DELETE` is appended.
pub const CHANGE_TYPE_PREFIX: &str = "http://www.ft.com/thing/ThingChangeType/";

/// Payload of a heartbeat frame (an empty notification list).
pub const HEARTBEAT_MSG: &str = "[]";

/// The two kinds of change a notification can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }

    /// Full change-type URI, e.g. `http://www.ft.com/thing/ThingChangeType/DELETE`.
    pub fn uri(&self) -> String {
        format!("{CHANGE_TYPE_PREFIX}{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Standout {
    #[serde(default)]
    pub scoop: bool,
}

/// A single change notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub api_url: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Originating transaction id. Stripped for standard subscribers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub publish_reference: String,
    /// RFC3339 timestamp of the source change. Stripped for standard subscribers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
    /// Assigned when the dispatcher forwards the notification.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notification_date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default)]
    pub standout: Standout,
    #[serde(skip)]
    pub content_type: String,
}

impl Notification {
    /// True when `type` names a DELETE change.
    pub fn is_delete(&self) -> bool {
        self.kind.ends_with(ChangeType::Delete.as_str())
    }

    /// `last_modified` parsed as RFC3339, or `None` when absent or malformed.
    pub fn last_modified_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.last_modified).ok()
    }

    /// Copy with `publish_reference` and `last_modified` cleared, as
    /// delivered to standard subscribers.
    pub fn stripped(&self) -> Notification {
        Notification {
            publish_reference: String::new(),
            last_modified: String::new(),
            ..self.clone()
        }
    }
}

/// Current time formatted as RFC3339 with millisecond precision.
pub fn notification_date_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Encode a list of notifications as JSON.
///
/// serde_json never HTML-escapes, so `&`, `<` and `>` in URLs and titles
/// stay literal on the wire.
pub fn marshal_notifications_json(notifications: &[Notification]) -> serde_json::Result<String> {
    serde_json::to_string(notifications)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notification {
        Notification {
            api_url: "http://api.ft.com/content/7998974a-1e97-11e6-b286-cddde55ca122".to_string(),
            id: "http://www.ft.com/thing/7998974a-1e97-11e6-b286-cddde55ca122".to_string(),
            kind: ChangeType::Update.uri(),
            publish_reference: "tid_test1".to_string(),
            last_modified: "2016-11-02T10:54:22.234Z".to_string(),
            content_type: "Article".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_content_type_never_serialized() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("Article"));
        assert!(!json.contains("contentType"));
    }

    #[test]
    fn test_empty_optional_fields_omitted() {
        let json = serde_json::to_string(&sample().stripped()).unwrap();
        assert!(!json.contains("publishReference"));
        assert!(!json.contains("lastModified"));
        assert!(!json.contains("title"));
        assert!(json.contains(r#""standout":{"scoop":false}"#));
    }

    #[test]
    fn test_marshal_does_not_escape_html() {
        let mut n = sample();
        n.api_url = "http://api.ft.com/lists?a=1&b=<2>".to_string();
        let json = marshal_notifications_json(&[n]).unwrap();
        assert!(json.contains("a=1&b=<2>"));
        assert!(!json.contains("\\u0026"));
    }

    #[test]
    fn test_is_delete() {
        let mut n = sample();
        assert!(!n.is_delete());
        n.kind = ChangeType::Delete.uri();
        assert!(n.is_delete());
    }

    #[test]
    fn test_notification_date_has_millis() {
        let date = notification_date_now();
        let parsed = DateTime::parse_from_rfc3339(&date).unwrap();
        assert_eq!(parsed.timestamp_subsec_nanos() % 1_000_000, 0);
        assert!(date.ends_with('Z'));
    }
}
