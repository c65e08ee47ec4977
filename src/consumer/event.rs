// Publication events and transaction-id classification.

use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Transaction ids of content carousel republishes: a token, `_carousel_`,
/// a 10 digit epoch, optionally followed by a suffix.
pub const CAROUSEL_TID_PATTERN: &str = r"^(\S+)_carousel_\d{10}.*$";

/// Body of a publication message.
///
/// Canonical JSON casing is `contentUri`, `payload`, `lastModified`; the
/// older `ContentURI`, `Payload`, `LastModified` spellings are accepted too.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PublicationEvent {
    #[serde(rename = "contentUri", alias = "ContentURI", alias = "contentURI", default)]
    pub content_uri: String,
    #[serde(alias = "Payload", default)]
    pub payload: Option<Value>,
    #[serde(rename = "lastModified", alias = "LastModified", default)]
    pub last_modified: String,
}

impl PublicationEvent {
    /// True when the payload is absent, null, an empty string or an empty
    /// object. Such events describe deletions.
    pub fn has_empty_payload(&self) -> bool {
        match &self.payload {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Object(m)) => m.is_empty(),
            Some(_) => false,
        }
    }

    pub fn matches(&self, whitelist: &Regex) -> bool {
        whitelist.is_match(&self.content_uri)
    }
}

/// Why a message was discarded before mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Synthetic,
    Carousel,
    NotWhitelisted,
}

/// Classifies transaction ids that must never reach subscribers.
#[derive(Debug, Clone)]
pub struct TransactionFilter {
    synthetic_prefix: String,
    carousel: Option<Regex>,
}

impl TransactionFilter {
    /// An empty `synthetic_prefix` disables the synthetic check.
    pub fn new(synthetic_prefix: &str, suppress_carousel: bool) -> Result<Self, regex_lite::Error> {
        let carousel = if suppress_carousel {
            Some(Regex::new(CAROUSEL_TID_PATTERN)?)
        } else {
            None
        };
        Ok(Self {
            synthetic_prefix: synthetic_prefix.to_string(),
            carousel,
        })
    }

    pub fn is_synthetic(&self, transaction_id: &str) -> bool {
        !self.synthetic_prefix.is_empty() && transaction_id.starts_with(&self.synthetic_prefix)
    }

    pub fn is_carousel(&self, transaction_id: &str) -> bool {
        self.carousel
            .as_ref()
            .is_some_and(|re| re.is_match(transaction_id))
    }

    /// Synthetic is checked before carousel.
    pub fn skip_reason(&self, transaction_id: &str) -> Option<SkipReason> {
        if self.is_synthetic(transaction_id) {
            Some(SkipReason::Synthetic)
        } else if self.is_carousel(transaction_id) {
            Some(SkipReason::Carousel)
        } else {
            None
        }
    }
}
