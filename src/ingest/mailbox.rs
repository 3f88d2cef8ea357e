//! External mailbox adapter.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::try_join_all;
use regex::{Captures, Regex};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::MailboxError;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// One remote mailbox item.
#[derive(Debug, Clone, PartialEq)]
pub struct MailItem {
    pub remote_id: String,
    pub thread_id: String,
    pub snippet: String,
    pub subject: String,
    pub from: String,
    pub received_at: DateTime<Utc>,
}

impl MailItem {
    /// Task content for this item: subject, blank line, snippet.
    pub fn content(&self) -> String {
        format!("{}\n\n{}", self.subject, self.snippet)
    }
}

/// Fetches recent items from a mailbox.
///
/// An unauthorized response must surface as [`MailboxError::Unauthorized`]
/// so the caller can disconnect the connector.
#[async_trait]
pub trait MailboxClient: Send + Sync {
    async fn fetch_recent(
        &self,
        credential: &SecretString,
        max_results: u32,
    ) -> Result<Vec<MailItem>, MailboxError>;
}

/// Gmail REST client: list inbox ids, then fetch headers for each.
pub struct GmailClient {
    client: reqwest::Client,
    base_url: String,
}

impl GmailClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: GMAIL_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
        credential: &SecretString,
    ) -> Result<T, MailboxError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(credential.expose_secret())
            .send()
            .await
            .map_err(|e| MailboxError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MailboxError::Unauthorized);
        }
        if !status.is_success() {
            return Err(MailboxError::Request(format!("HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| MailboxError::InvalidPayload(e.to_string()))
    }

    async fn fetch_one(
        &self,
        id: &str,
        credential: &SecretString,
    ) -> Result<MailItem, MailboxError> {
        let message: GmailMessage = self
            .get_json(
                &format!("{}/messages/{}", self.base_url, id),
                &[
                    ("format", "metadata".to_string()),
                    ("metadataHeaders", "Subject".to_string()),
                    ("metadataHeaders", "From".to_string()),
                ],
                credential,
            )
            .await?;
        Ok(message.into_item())
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailboxClient for GmailClient {
    async fn fetch_recent(
        &self,
        credential: &SecretString,
        max_results: u32,
    ) -> Result<Vec<MailItem>, MailboxError> {
        let list: GmailList = self
            .get_json(
                &format!("{}/messages", self.base_url),
                &[
                    ("maxResults", max_results.to_string()),
                    ("labelIds", "INBOX".to_string()),
                ],
                credential,
            )
            .await?;

        try_join_all(
            list.messages
                .iter()
                .map(|m| self.fetch_one(&m.id, credential)),
        )
        .await
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GmailList {
    #[serde(default)]
    messages: Vec<GmailRef>,
}

#[derive(Debug, Deserialize)]
struct GmailRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    /// Milliseconds since the epoch, as a string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<GmailPayload>,
}

#[derive(Debug, Deserialize)]
struct GmailPayload {
    #[serde(default)]
    headers: Vec<GmailHeader>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

impl GmailMessage {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn into_item(self) -> MailItem {
        let subject = self
            .header("Subject")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("(no subject)")
            .to_string();
        let from = self.header("From").unwrap_or("unknown").to_string();
        let received_at = self
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        MailItem {
            remote_id: self.id,
            thread_id: self.thread_id,
            snippet: decode_entities(&self.snippet),
            subject,
            from,
            received_at,
        }
    }
}

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|(amp|lt|gt|quot|apos|nbsp));").unwrap()
});

/// Snippets arrive HTML-escaped. Decoding is a single pass, so `&amp;lt;`
/// becomes `&lt;`, not `<`.
fn decode_entities(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &Captures| {
            let code = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok()
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok()
            } else {
                None
            };
            if let Some(code) = code {
                return char::from_u32(code)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string());
            }
            match caps.get(3).map(|m| m.as_str()) {
                Some("amp") => "&",
                Some("lt") => "<",
                Some("gt") => ">",
                Some("quot") => "\"",
                Some("apos") => "'",
                Some("nbsp") => "\u{a0}",
                _ => &caps[0],
            }
            .to_string()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_maps_to_item() {
        let raw = r#"{
            "id": "18c2f0a",
            "threadId": "18c2f00",
            "snippet": "Can we meet Thursday? It&#39;s about Q3",
            "internalDate": "1700000000000",
            "payload": {"headers": [
                {"name": "From", "value": "Dana <dana@example.com>"},
                {"name": "subject", "value": "Planning"}
            ]}
        }"#;
        let msg: GmailMessage = serde_json::from_str(raw).unwrap();
        let item = msg.into_item();
        assert_eq!(item.remote_id, "18c2f0a");
        assert_eq!(item.thread_id, "18c2f00");
        assert_eq!(item.subject, "Planning");
        assert_eq!(item.from, "Dana <dana@example.com>");
        assert_eq!(item.snippet, "Can we meet Thursday? It's about Q3");
        assert_eq!(item.received_at.timestamp(), 1_700_000_000);
        assert_eq!(item.content(), "Planning\n\nCan we meet Thursday? It's about Q3");
    }

    #[test]
    fn snippet_entities_are_decoded() {
        assert_eq!(
            decode_entities("It&#8217;s &#x27;Q3&#X27; &lt;final&gt; &quot;A&amp;B&quot;"),
            "It\u{2019}s 'Q3' <final> \"A&B\""
        );
        assert_eq!(decode_entities("&amp;lt; stays escaped once"), "&lt; stays escaped once");
        assert_eq!(decode_entities("&#xD800; &bogus; & alone"), "&#xD800; &bogus; & alone");
    }

    #[test]
    fn missing_headers_get_placeholders() {
        let msg: GmailMessage = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        let item = msg.into_item();
        assert_eq!(item.subject, "(no subject)");
        assert_eq!(item.from, "unknown");
    }

    #[test]
    fn empty_inbox_lists_nothing() {
        let list: GmailList = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(list.messages.is_empty());
    }

    #[tokio::test]
    async fn unreachable_host_is_request_error() {
        let client = GmailClient::new().with_base_url("http://127.0.0.1:1");
        let err = client
            .fetch_recent(&SecretString::from("tok"), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, MailboxError::Request(_)));
        assert!(!err.is_unauthorized());
    }
}
