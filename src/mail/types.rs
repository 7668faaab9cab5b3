use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mailbox message as returned by `/me/messages`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub sender: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub cc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub received_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_draft: bool,
}

impl Message {
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("(no subject)")
    }

    /// Who the message is from, falling back to the sender field.
    pub fn display_from(&self) -> String {
        self.from
            .as_ref()
            .or(self.sender.as_ref())
            .map(|r| r.email_address.display())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn display_to(&self) -> String {
        self.to_recipients
            .iter()
            .map(|r| r.email_address.display())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Addresses of the To recipients
    pub fn recipient_addresses(&self) -> Vec<String> {
        self.to_recipients
            .iter()
            .filter_map(|r| r.email_address.address.clone())
            .collect()
    }

    /// Readable body text: the preview when present, else the body with
    /// HTML converted to plain text.
    pub fn body_text(&self) -> String {
        if let Some(preview) = self.body_preview.as_deref().filter(|p| !p.trim().is_empty()) {
            return preview.to_string();
        }
        match &self.body {
            Some(body) => body.display_text(),
            None => "[No content]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    #[default]
    Text,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content_type: BodyType,
    #[serde(default)]
    pub content: String,
}

impl ItemBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content_type: BodyType::Text,
            content: content.into(),
        }
    }

    #[cfg(test)]
    pub fn html(content: impl Into<String>) -> Self {
        Self {
            content_type: BodyType::Html,
            content: content.into(),
        }
    }

    pub fn display_text(&self) -> String {
        match self.content_type {
            BodyType::Text => self.content.clone(),
            BodyType::Html => strip_html_tags(&self.content),
        }
    }
}

/// Convert HTML to readable plain text
fn strip_html_tags(html: &str) -> String {
    html2text::config::plain()
        .string_from_read(html.as_bytes(), 80)
        .unwrap_or_else(|_| html.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            email_address: EmailAddress {
                name: None,
                address: Some(address.into()),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl EmailAddress {
    /// `Name <address>`, or whichever half is present.
    pub fn display(&self) -> String {
        match (self.name.as_deref(), self.address.as_deref()) {
            (Some(name), Some(addr)) if !name.is_empty() && name != addr => {
                format!("{} <{}>", name, addr)
            }
            (_, Some(addr)) => addr.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => "Unknown".to_string(),
        }
    }
}

/// Body of `POST /me/messages`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDraft {
    pub subject: String,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
}

impl NewDraft {
    /// Plain-text draft to a comma-separated recipient list.
    pub fn plain(subject: &str, to: &str, body: &str) -> Self {
        Self {
            subject: subject.to_string(),
            body: ItemBody::text(body),
            to_recipients: to
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(Recipient::new)
                .collect(),
        }
    }
}

/// Body of `PATCH /me/messages/{id}`; absent fields are left as they are.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ItemBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_recipients: Option<Vec<Recipient>>,
}

/// Collection envelope
#[derive(Debug, Deserialize)]
pub(crate) struct MessageList {
    #[serde(default)]
    pub value: Vec<Message>,
}
