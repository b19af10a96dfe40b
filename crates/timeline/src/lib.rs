pub mod calendar;
pub mod error;
pub mod feed;
pub mod settings;
pub mod store;
pub mod types;

pub use calendar::{CalendarDays, DEFAULT_DATE_FORMAT, DayKeyer};
pub use error::{SettingsError, SettingsResult};
pub use feed::{AppliedChange, FeedSummary, TimelineEvent, TimelineFeed, apply_event};
pub use settings::TimelineSettings;
pub use store::OrderedMessageStore;
pub use types::{
    ChatMessage, MessageId, Order, TimelineDivider, TimelineEntry, TimelineMessage,
};

/// Read/write surface the session layer feeds and the rendering layer reads.
///
/// "Not found" is a normal outcome reported through `bool`/`Option`, never an error.
/// Batch methods apply one element at a time; they are not atomic.
pub trait MessageTimeline: Send + Sync {
    type Message: TimelineMessage;

    /// Inserts a copy of `message`, replacing any message with the same `created_at`.
    fn add(&self, message: &Self::Message);

    fn add_all(&self, messages: &[Self::Message]) -> usize {
        tracing::debug!(count = messages.len(), "adding message batch");
        for message in messages {
            self.add(message);
        }
        messages.len()
    }

    /// Replaces the message stored at `message.created_at()`; no insert on miss.
    fn update(&self, message: &Self::Message) -> bool;

    fn update_all(&self, messages: &[Self::Message]) -> usize {
        tracing::debug!(count = messages.len(), "updating message batch");
        messages
            .iter()
            .filter(|message| self.update(message))
            .count()
    }

    /// Removes whatever message sits at `message.created_at()`.
    fn delete(&self, message: &Self::Message) -> bool;

    fn delete_all(&self, messages: &[Self::Message]) -> usize {
        tracing::debug!(count = messages.len(), "deleting message batch");
        messages
            .iter()
            .filter(|message| self.delete(message))
            .count()
    }

    fn delete_by_message_id(&self, message_id: MessageId) -> bool;

    fn get_by_id(&self, message_id: MessageId) -> Option<Self::Message>;

    fn get_by_created_at(&self, created_at: i64) -> Vec<TimelineEntry<Self::Message>>;

    /// Newest entry by `created_at`, whatever the configured order.
    fn latest(&self) -> Option<TimelineEntry<Self::Message>>;

    /// Oldest entry, which is the earliest day's divider when the store is non-empty.
    fn oldest(&self) -> Option<TimelineEntry<Self::Message>>;

    /// Snapshot of messages and dividers in display order.
    fn to_list(&self) -> Vec<TimelineEntry<Self::Message>>;

    fn clear(&self);
}
