//! Inbox provider boundary and message body handling

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;

/// Metadata for a single message, fetched after discovery
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub date: DateTime<Utc>,
    /// Filename hint for the first attachment, if the provider exposes one
    pub attachment_hint: Option<String>,
}

/// A binary attachment fetched from the provider
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Message body in the forms the provider can return
#[derive(Debug, Clone, Default)]
pub struct MessageBody {
    pub plain_text: Option<String>,
    pub html: Option<String>,
}

/// One page of message identifiers from the provider's list API
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub message_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Trait defining inbox provider operations for easier testing
#[async_trait]
pub trait InboxProvider: Send + Sync {
    /// List message IDs matching a query, one page at a time
    async fn list(&self, query: &str, page_token: Option<String>) -> Result<MessagePage>;

    /// Get per-message metadata
    async fn fetch_metadata(&self, id: &str) -> Result<MessageMeta>;

    /// Fetch all attachments for a message
    async fn fetch_attachments(&self, id: &str) -> Result<Vec<Attachment>>;

    /// Fetch the message body
    async fn fetch_body(&self, id: &str) -> Result<MessageBody>;
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

static HTTP_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).unwrap());

/// Reduce an HTML body to plain text
pub fn strip_html(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pick the best available body text: plain text preferred over the
/// snippet preferred over HTML stripped to text, truncated to `max_chars`.
pub fn select_body_text(body: &MessageBody, snippet: &str, max_chars: usize) -> String {
    let text = if let Some(plain) = body.plain_text.as_ref().filter(|t| !t.trim().is_empty()) {
        plain.clone()
    } else if !snippet.trim().is_empty() {
        snippet.to_string()
    } else if let Some(html) = body.html.as_ref() {
        strip_html(html)
    } else {
        String::new()
    };

    truncate_chars(&text, max_chars)
}

/// Extract up to `max_links` http(s) URLs from the body, HTML first
pub fn extract_inline_links(body: &MessageBody, max_links: usize) -> Vec<String> {
    let mut links = Vec::new();

    for source in [body.html.as_deref(), body.plain_text.as_deref()]
        .into_iter()
        .flatten()
    {
        for m in HTTP_LINK.find_iter(source) {
            let url = m.as_str().trim_end_matches(['.', ',', ';']).to_string();
            if !links.contains(&url) {
                links.push(url);
            }
            if links.len() >= max_links {
                return links;
            }
        }
    }

    links
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
