//! Administrative notices and their webhook embed rendering.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Error,
    Warning,
    Info,
    Success,
}

impl NoticeLevel {
    /// Embed side-bar color.
    pub fn color(self) -> u32 {
        match self {
            NoticeLevel::Error => 0xff0000,
            NoticeLevel::Warning => 0xffa500,
            NoticeLevel::Info => 0xffff00,
            NoticeLevel::Success => 0x00ff00,
        }
    }
}

/// A consolidated message for the administrative recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub level: NoticeLevel,
    pub fields: Vec<(String, String)>,
    /// Prepended to the message content so the recipient gets pinged.
    pub mention: Option<String>,
}

impl Notice {
    pub fn new(level: NoticeLevel, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            level,
            fields: Vec::new(),
            mention: None,
        }
    }

    pub fn with_mention(mut self, mention: Option<&str>) -> Self {
        self.mention = mention.filter(|m| !m.is_empty()).map(str::to_string);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Plain-text rendering, used by logs and by sinks without rich formatting.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        if let Some(mention) = &self.mention {
            text.push_str(mention);
            text.push('\n');
        }
        text.push_str(&self.title);
        text.push('\n');
        text.push_str(&self.description);
        for (name, value) in &self.fields {
            text.push_str(&format!("\n{}: {}", name, value.replace('\n', ", ")));
        }
        text
    }

    pub(crate) fn to_payload(&self, now: DateTime<Utc>) -> WebhookPayload<'_> {
        WebhookPayload {
            content: self.mention.as_deref().unwrap_or(""),
            embeds: vec![Embed {
                title: &self.title,
                description: &self.description,
                color: self.level.color(),
                timestamp: now.to_rfc3339(),
                fields: self
                    .fields
                    .iter()
                    .map(|(name, value)| EmbedField { name, value })
                    .collect(),
            }],
        }
    }
}

/// Wrap lines in a fenced block, the way file lists are shown in notices.
pub fn code_block(lines: &[String]) -> String {
    format!("```\n{}\n```", lines.join("\n"))
}

#[derive(Debug, Serialize)]
pub(crate) struct WebhookPayload<'a> {
    content: &'a str,
    embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedField<'a> {
    name: &'a str,
    value: &'a str,
}
