use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier the session layer assigns to one message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Direction the timeline is sorted in, fixed for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Ascending,
    #[default]
    Descending,
}

impl Order {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ascending" | "asc" => Some(Self::Ascending),
            "descending" | "desc" => Some(Self::Descending),
            _ => None,
        }
    }
}

/// A message as the store sees it: identity, timestamp and channel.
///
/// The payload behind it stays opaque; the store only clones values on insert so
/// later caller-side mutation never leaks into the timeline.
pub trait TimelineMessage: Clone + Send + Sync {
    fn message_id(&self) -> MessageId;

    /// Creation time in milliseconds since the Unix epoch.
    fn created_at(&self) -> i64;

    fn channel_url(&self) -> &str;
}

/// Stock message record delivered by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage<P = String> {
    pub id: MessageId,
    pub created_at: i64,
    pub channel_url: String,
    pub payload: P,
}

impl<P> ChatMessage<P> {
    pub fn new(
        id: MessageId,
        created_at: i64,
        channel_url: impl Into<String>,
        payload: P,
    ) -> Self {
        Self {
            id,
            created_at,
            channel_url: channel_url.into(),
            payload,
        }
    }
}

impl<P> TimelineMessage for ChatMessage<P>
where
    P: Clone + Send + Sync,
{
    fn message_id(&self) -> MessageId {
        self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn channel_url(&self) -> &str {
        &self.channel_url
    }
}

/// Display-only marker for the first chronological boundary of a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimelineDivider {
    pub date_key: String,
    /// One millisecond before the earliest message of the day, saturating at `i64::MIN`.
    pub anchor_created_at: i64,
}

impl TimelineDivider {
    pub fn new(date_key: impl Into<String>, anchor_created_at: i64) -> Self {
        Self {
            date_key: date_key.into(),
            anchor_created_at,
        }
    }

    /// Divider sitting right before a message created at `created_at`.
    pub fn anchored_before(date_key: impl Into<String>, created_at: i64) -> Self {
        Self::new(date_key, created_at.saturating_sub(1))
    }
}

/// One row of the rendered timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entry", rename_all = "snake_case")]
pub enum TimelineEntry<M> {
    Message(M),
    Divider(TimelineDivider),
}

impl<M: TimelineMessage> TimelineEntry<M> {
    /// Sort timestamp: the message creation time, or the divider anchor.
    pub fn created_at(&self) -> i64 {
        match self {
            Self::Message(message) => message.created_at(),
            Self::Divider(divider) => divider.anchor_created_at,
        }
    }

    pub fn as_message(&self) -> Option<&M> {
        match self {
            Self::Message(message) => Some(message),
            Self::Divider(_) => None,
        }
    }

    pub fn as_divider(&self) -> Option<&TimelineDivider> {
        match self {
            Self::Message(_) => None,
            Self::Divider(divider) => Some(divider),
        }
    }

    pub fn into_message(self) -> Option<M> {
        match self {
            Self::Message(message) => Some(message),
            Self::Divider(_) => None,
        }
    }

    pub fn is_divider(&self) -> bool {
        matches!(self, Self::Divider(_))
    }
}
