// Queue message and the framed text format used on the publication topic.
//
// A framed message looks like:
//
//   FTMSG/1.0
//   X-Request-Id: tid_abc
//   Message-Timestamp: 2016-11-02T10:54:22.234Z
//
//   {"contentUri": "...", "payload": {...}, "lastModified": "..."}
//
// Lines may end in CRLF or LF.

use std::collections::HashMap;

use super::QueueError;

/// Header carrying the transaction id.
pub const TRANSACTION_ID_HEADER: &str = "X-Request-Id";

const FRAME_PREFIX: &str = "FTMSG/";

/// One message consumed from the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMessage {
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl QueueMessage {
    pub fn new(headers: HashMap<String, String>, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Header lookup, exact name first, then case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// The transaction id, or "" when the header is missing.
    pub fn transaction_id(&self) -> &str {
        self.header(TRANSACTION_ID_HEADER).unwrap_or("")
    }
}

/// Parse a framed message into headers and body.
pub fn parse_ft_message(raw: &str) -> Result<QueueMessage, QueueError> {
    let (head, body) = match raw.find("\r\n\r\n") {
        Some(i) => (&raw[..i], &raw[i + 4..]),
        None => match raw.find("\n\n") {
            Some(i) => (&raw[..i], &raw[i + 2..]),
            None => return Err(QueueError::Decode("missing header terminator".to_string())),
        },
    };

    let mut lines = head.lines();
    match lines.next() {
        Some(version) if version.trim().starts_with(FRAME_PREFIX) => {}
        other => {
            return Err(QueueError::Decode(format!(
                "unexpected frame version line: {:?}",
                other.unwrap_or("")
            )))
        }
    }

    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(QueueError::Decode(format!("malformed header line: {line}")));
        };
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    Ok(QueueMessage::new(headers, body))
}
