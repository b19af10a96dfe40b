use std::sync::Arc;

use tokio::sync::mpsc;

use super::MessageTimeline;
use super::types::MessageId;

/// Change set delivered by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent<M> {
    Added(Vec<M>),
    Updated(Vec<M>),
    Deleted(Vec<M>),
    DeletedByIds(Vec<MessageId>),
    Cleared,
}

impl<M> TimelineEvent<M> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
            Self::DeletedByIds(_) => "deleted-by-ids",
            Self::Cleared => "cleared",
        }
    }

    fn requested(&self) -> usize {
        match self {
            Self::Added(messages) | Self::Updated(messages) | Self::Deleted(messages) => {
                messages.len()
            }
            Self::DeletedByIds(ids) => ids.len(),
            Self::Cleared => 0,
        }
    }
}

/// How much of one event actually changed the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppliedChange {
    pub requested: usize,
    pub applied: usize,
}

/// Totals over everything a feed drained before its sender closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedSummary {
    pub events: usize,
    pub requested: usize,
    pub applied: usize,
}

/// Routes one event to the matching timeline calls, element by element.
pub fn apply_event<T>(timeline: &T, event: TimelineEvent<T::Message>) -> AppliedChange
where
    T: MessageTimeline + ?Sized,
{
    let requested = event.requested();
    let applied = match event {
        TimelineEvent::Added(messages) => timeline.add_all(&messages),
        TimelineEvent::Updated(messages) => timeline.update_all(&messages),
        TimelineEvent::Deleted(messages) => timeline.delete_all(&messages),
        TimelineEvent::DeletedByIds(ids) => ids
            .into_iter()
            .filter(|message_id| timeline.delete_by_message_id(*message_id))
            .count(),
        TimelineEvent::Cleared => {
            timeline.clear();
            0
        }
    };

    AppliedChange { requested, applied }
}

/// Drains session events into a shared timeline from a background task.
pub struct TimelineFeed<T: MessageTimeline> {
    timeline: Arc<T>,
    events: mpsc::Receiver<TimelineEvent<T::Message>>,
}

impl<T: MessageTimeline> TimelineFeed<T> {
    pub fn new(timeline: Arc<T>, events: mpsc::Receiver<TimelineEvent<T::Message>>) -> Self {
        Self { timeline, events }
    }

    pub fn channel(
        timeline: Arc<T>,
        capacity: usize,
    ) -> (mpsc::Sender<TimelineEvent<T::Message>>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self::new(timeline, receiver))
    }

    pub fn timeline(&self) -> &Arc<T> {
        &self.timeline
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) -> FeedSummary {
        let mut summary = FeedSummary::default();
        while let Some(event) = self.events.recv().await {
            let kind = event.kind();
            let change = apply_event(self.timeline.as_ref(), event);
            tracing::trace!(
                kind,
                requested = change.requested,
                applied = change.applied,
                "applied timeline event"
            );
            summary.events += 1;
            summary.requested += change.requested;
            summary.applied += change.applied;
        }

        tracing::debug!(
            events = summary.events,
            applied = summary.applied,
            "timeline feed closed"
        );
        summary
    }
}
