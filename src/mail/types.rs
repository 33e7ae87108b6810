//! Email thread types (the unit of classification) plus quote stripping
//! and address normalization helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a participant appears on a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[default]
    From,
    To,
    Cc,
    Bcc,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }
}

/// A person on a thread or message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailParticipant {
    /// Email address as supplied by the mail gateway (may include a display name).
    pub email: String,
    /// Display name, possibly empty.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub role: ParticipantRole,
}

impl EmailParticipant {
    pub fn new(email: impl Into<String>, name: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAttachment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mime_type: String,
}

/// One message in a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: String,
    pub from: EmailParticipant,
    #[serde(default)]
    pub to: Vec<EmailParticipant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<EmailParticipant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<EmailParticipant>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<EmailAttachment>,
}

/// Where a label comes from in the mail system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    System,
    User,
    #[default]
    Custom,
}

impl LabelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Self::System,
            "user" => Self::User,
            _ => Self::Custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLabel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: LabelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl EmailLabel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: LabelKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            color: None,
        }
    }

    /// Placeholder for a label id the catalog does not know: named after its id.
    pub fn custom(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, LabelKind::Custom)
    }
}

/// A pre-fetched email thread. The engine never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailThread {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub participants: Vec<EmailParticipant>,
    /// Messages, oldest first.
    #[serde(default)]
    pub messages: Vec<EmailMessage>,
    /// Labels already applied in the mail system.
    #[serde(default)]
    pub labels: Vec<EmailLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snippet: String,
}

impl EmailThread {
    /// Minimal thread with just an id and subject.
    pub fn new(id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            participants: Vec::new(),
            messages: Vec::new(),
            labels: Vec::new(),
            last_updated: None,
            snippet: String::new(),
        }
    }

    /// A thread must at least carry an id to be classified.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Messages oldest first, tolerating callers that did not sort them.
    pub fn messages_in_order(&self) -> Vec<&EmailMessage> {
        let mut ordered: Vec<&EmailMessage> = self.messages.iter().collect();
        ordered.sort_by_key(|m| m.timestamp);
        ordered
    }

    /// Subject used for entity extraction: the thread subject, or the first
    /// message's subject when the thread has none.
    pub fn effective_subject(&self) -> &str {
        if !self.subject.trim().is_empty() {
            return &self.subject;
        }
        self.messages_in_order()
            .first()
            .map(|m| m.subject.as_str())
            .unwrap_or("")
    }
}

/// A normalized mailbox address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Lowercased `local@domain`.
    pub address: String,
    pub local: String,
    pub domain: String,
}

/// Normalize a raw address (`alice@acme.com`, `Alice <Alice@Acme.com>`).
///
/// Returns `None` for anything that is not a single `local@domain` pair.
pub fn parse_mailbox(raw: &str) -> Option<Mailbox> {
    let raw = raw.trim();
    let inner = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    let address = inner.trim().trim_matches('"').to_lowercase();
    if address.chars().any(char::is_whitespace) {
        return None;
    }

    let mut parts = address.split('@');
    let local = parts.next()?.to_string();
    let domain = parts.next()?.trim_end_matches('.').to_string();
    if parts.next().is_some() || local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }

    Some(Mailbox {
        address: format!("{local}@{domain}"),
        local,
        domain,
    })
}

/// Strip quoted text from an email body.
///
/// Removes:
/// - Lines starting with `>` (quoted reply lines)
/// - "On ... wrote:" attribution lines and everything after them
/// - "--- Original Message ---" separators and everything after them
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── strip_quoted_text ───────────────────────────────────────

    #[test]
    fn strip_basic_quoted_lines() {
        let body = "Hello!\n\n> This is quoted\n> Another quoted line\nThanks";
        assert_eq!(strip_quoted_text(body), "Hello!\n\nThanks");
    }

    #[test]
    fn strip_on_wrote_attribution() {
        let body = "Sounds good!\n\nOn Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:\n> Original message";
        assert_eq!(strip_quoted_text(body), "Sounds good!");
    }

    #[test]
    fn strip_original_message_separator() {
        let body = "My reply\n\n--- Original Message ---\nOld stuff here";
        assert_eq!(strip_quoted_text(body), "My reply");
    }

    #[test]
    fn strip_empty_input() {
        assert_eq!(strip_quoted_text(""), "");
    }

    // ── parse_mailbox ───────────────────────────────────────────

    #[test]
    fn parses_plain_address() {
        let mb = parse_mailbox("Alice@Acme.COM").unwrap();
        assert_eq!(mb.address, "alice@acme.com");
        assert_eq!(mb.local, "alice");
        assert_eq!(mb.domain, "acme.com");
    }

    #[test]
    fn parses_display_name_form() {
        let mb = parse_mailbox("Jane Doe <jane@client.io>").unwrap();
        assert_eq!(mb.address, "jane@client.io");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_mailbox("").is_none());
        assert!(parse_mailbox("not an address").is_none());
        assert!(parse_mailbox("a@b@c.com").is_none());
        assert!(parse_mailbox("@acme.com").is_none());
        assert!(parse_mailbox("bob@localhost").is_none());
    }

    // ── thread helpers ──────────────────────────────────────────

    #[test]
    fn thread_deserializes_original_wire_shape() {
        let json = r#"{
            "id": "t-1",
            "subject": "Renewal",
            "participants": [{"email": "alice@acme.com", "name": "Alice", "type": "from"}],
            "messages": [{
                "id": "m-1",
                "from": {"email": "alice@acme.com", "name": "Alice", "type": "from"},
                "to": [{"email": "bob@client.com", "name": "Bob", "type": "to"}],
                "subject": "Renewal",
                "body": "Hi Bob",
                "timestamp": "2026-02-15T10:00:00Z",
                "attachments": [{"id": "a-1", "name": "quote.pdf", "size": 10, "mimeType": "application/pdf"}]
            }],
            "labels": [{"id": "INBOX", "name": "Inbox", "type": "system"}],
            "lastUpdated": "2026-02-15T10:00:00Z",
            "snippet": "Hi Bob"
        }"#;
        let thread: EmailThread = serde_json::from_str(json).unwrap();
        assert_eq!(thread.participants[0].role, ParticipantRole::From);
        assert_eq!(thread.messages[0].attachments[0].mime_type, "application/pdf");
        assert_eq!(thread.labels[0].kind, LabelKind::System);
        assert!(thread.is_well_formed());
    }

    #[test]
    fn blank_id_is_not_well_formed() {
        assert!(!EmailThread::new("  ", "x").is_well_formed());
    }

    #[test]
    fn effective_subject_falls_back_to_first_message() {
        let mut thread = EmailThread::new("t", "");
        thread.messages.push(EmailMessage {
            id: "m".into(),
            from: EmailParticipant::new("a@acme.com", "A", ParticipantRole::From),
            to: vec![],
            cc: vec![],
            bcc: vec![],
            subject: "Kickoff".into(),
            body: String::new(),
            timestamp: Utc::now(),
            attachments: vec![],
        });
        assert_eq!(thread.effective_subject(), "Kickoff");
    }
}
