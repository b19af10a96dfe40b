use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::MessageTimeline;
use super::calendar::{CalendarDays, DayKeyer};
use super::error::SettingsResult;
use super::settings::TimelineSettings;
use super::types::{MessageId, Order, TimelineDivider, TimelineEntry, TimelineMessage};

/// Messages and dividers never displace each other; messages collide only with
/// messages sharing a `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lane {
    Message,
    Divider,
}

/// Position on the widened time axis. A divider sits one tick before the message
/// it anchors to, which stays representable even below `i64::MIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SlotKey {
    position: i128,
    lane: Lane,
}

impl SlotKey {
    fn message(created_at: i64) -> Self {
        Self {
            position: i128::from(created_at),
            lane: Lane::Message,
        }
    }

    fn divider_before(created_at: i64) -> Self {
        Self {
            position: i128::from(created_at) - 1,
            lane: Lane::Divider,
        }
    }

    fn divider_at(anchor_created_at: i64) -> Self {
        Self {
            position: i128::from(anchor_created_at),
            lane: Lane::Divider,
        }
    }
}

struct DayAnchor {
    slot: SlotKey,
    divider: TimelineDivider,
}

/// Container plus day index. Only ever touched through the store's single lock.
struct TimelineState<M> {
    // Always ascending; `Order` only decides which way it is read out.
    entries: BTreeMap<SlotKey, TimelineEntry<M>>,
    dividers: HashMap<String, DayAnchor>,
}

impl<M: TimelineMessage> TimelineState<M> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            dividers: HashMap::new(),
        }
    }

    // Every call into the day keyer happens before the first mutation, so a
    // panicking keyer leaves the state untouched.
    fn add(&mut self, message: M, day_keyer: &dyn DayKeyer) {
        let created_at = message.created_at();
        let date_key = day_keyer.day_key(created_at);
        let slot = SlotKey::divider_before(created_at);

        match self.dividers.get(&date_key).map(|anchor| anchor.slot) {
            None => {
                tracing::debug!(date_key = %date_key, created_at, "creating timeline divider");
                self.insert_divider(date_key, created_at);
            }
            Some(stale) if stale > slot => {
                tracing::debug!(
                    date_key = %date_key,
                    created_at,
                    "moving timeline divider to an earlier message"
                );
                self.entries.remove(&stale);
                self.insert_divider(date_key, created_at);
            }
            Some(_) => {}
        }

        let previous = self
            .entries
            .insert(SlotKey::message(created_at), TimelineEntry::Message(message));
        if let Some(TimelineEntry::Message(previous)) = previous {
            tracing::trace!(
                created_at,
                replaced_id = %previous.message_id(),
                "replaced message occupying the same timestamp"
            );
        }
    }

    fn insert_divider(&mut self, date_key: String, created_at: i64) {
        let slot = SlotKey::divider_before(created_at);
        let divider = TimelineDivider::anchored_before(date_key.clone(), created_at);
        self.entries
            .insert(slot, TimelineEntry::Divider(divider.clone()));
        self.dividers.insert(date_key, DayAnchor { slot, divider });
    }

    fn delete_at(&mut self, created_at: i64, day_keyer: &dyn DayKeyer) -> bool {
        let slot = SlotKey::message(created_at);
        if !self.entries.contains_key(&slot) {
            return false;
        }

        let date_key = day_keyer.day_key(created_at);
        let divider_slot = self.dividers.get(&date_key).map(|anchor| anchor.slot);

        // Same-day messages are contiguous, so the nearest message on either side
        // tells whether the day still has members. The anchor is left as is.
        let day_still_populated = divider_slot.is_some() && {
            let shares_day =
                |message: &M| day_keyer.day_key(message.created_at()) == date_key;
            self.message_before(slot).is_some_and(shares_day)
                || self.message_after(slot).is_some_and(shares_day)
        };

        self.entries.remove(&slot);
        if let (Some(divider_slot), false) = (divider_slot, day_still_populated) {
            tracing::debug!(date_key = %date_key, "removing empty day divider");
            self.entries.remove(&divider_slot);
            self.dividers.remove(&date_key);
        }

        true
    }

    fn message_before(&self, slot: SlotKey) -> Option<&M> {
        self.entries
            .range(..slot)
            .rev()
            .find_map(|(_, entry)| entry.as_message())
    }

    fn message_after(&self, slot: SlotKey) -> Option<&M> {
        self.entries
            .range((Bound::Excluded(slot), Bound::Unbounded))
            .find_map(|(_, entry)| entry.as_message())
    }

    fn update(&mut self, message: M) -> bool {
        match self.entries.get_mut(&SlotKey::message(message.created_at())) {
            Some(TimelineEntry::Message(slot)) => {
                *slot = message;
                true
            }
            _ => false,
        }
    }

    fn find_by_id(&self, message_id: MessageId) -> Option<&M> {
        self.entries
            .values()
            .filter_map(TimelineEntry::as_message)
            .find(|message| message.message_id() == message_id)
    }

    fn ordered<'a>(
        &'a self,
        order: Order,
    ) -> Box<dyn Iterator<Item = &'a TimelineEntry<M>> + 'a> {
        match order {
            Order::Ascending => Box::new(self.entries.values()),
            Order::Descending => Box::new(self.entries.values().rev()),
        }
    }
}

/// In-memory, always-sorted message timeline with per-day dividers.
///
/// Every public operation takes one exclusive lock for its own duration. Batch
/// calls (`add_all`, `delete_all`, `update_all`) lock once per element, so other
/// threads may interleave with them and readers may see a partially applied batch.
pub struct OrderedMessageStore<M> {
    order: Order,
    day_keyer: Box<dyn DayKeyer>,
    state: Mutex<TimelineState<M>>,
}

impl<M: TimelineMessage> OrderedMessageStore<M> {
    /// Store grouping days in the process-local timezone.
    pub fn new(order: Order) -> Self {
        Self::with_day_keyer(order, CalendarDays::local())
    }

    pub fn with_day_keyer(order: Order, day_keyer: impl DayKeyer + 'static) -> Self {
        Self {
            order,
            day_keyer: Box::new(day_keyer),
            state: Mutex::new(TimelineState::new()),
        }
    }

    pub fn from_settings(settings: &TimelineSettings) -> SettingsResult<Self> {
        Ok(Self::with_day_keyer(settings.order, settings.calendar()?))
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Number of entries, dividers included.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    pub fn message_count(&self) -> usize {
        let state = self.state();
        state.entries.len() - state.dividers.len()
    }

    /// Messages only, in display order.
    pub fn messages(&self) -> Vec<M> {
        let state = self.state();
        state
            .ordered(self.order)
            .filter_map(TimelineEntry::as_message)
            .cloned()
            .collect()
    }

    /// Dividers only, in display order.
    pub fn dividers(&self) -> Vec<TimelineDivider> {
        let state = self.state();
        state
            .ordered(self.order)
            .filter_map(TimelineEntry::as_divider)
            .cloned()
            .collect()
    }

    pub fn divider_for_day(&self, date_key: &str) -> Option<TimelineDivider> {
        self.state()
            .dividers
            .get(date_key)
            .map(|anchor| anchor.divider.clone())
    }

    fn state(&self) -> MutexGuard<'_, TimelineState<M>> {
        // Day keys are computed before any mutation, so a poisoned lock still
        // guards a consistent timeline.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: TimelineMessage> MessageTimeline for OrderedMessageStore<M> {
    type Message = M;

    fn add(&self, message: &M) {
        self.state().add(message.clone(), self.day_keyer.as_ref());
    }

    fn update(&self, message: &M) -> bool {
        self.state().update(message.clone())
    }

    fn delete(&self, message: &M) -> bool {
        self.state()
            .delete_at(message.created_at(), self.day_keyer.as_ref())
    }

    fn delete_by_message_id(&self, message_id: MessageId) -> bool {
        let mut state = self.state();
        let Some(created_at) = state
            .find_by_id(message_id)
            .map(TimelineMessage::created_at)
        else {
            return false;
        };
        state.delete_at(created_at, self.day_keyer.as_ref())
    }

    fn get_by_id(&self, message_id: MessageId) -> Option<M> {
        self.state().find_by_id(message_id).cloned()
    }

    fn get_by_created_at(&self, created_at: i64) -> Vec<TimelineEntry<M>> {
        let state = self.state();
        let mut found = state
            .entries
            .range(SlotKey::message(created_at)..=SlotKey::divider_at(created_at))
            .map(|(_, entry)| entry.clone())
            .collect::<Vec<_>>();
        if self.order == Order::Descending {
            found.reverse();
        }
        found
    }

    fn latest(&self) -> Option<TimelineEntry<M>> {
        self.state()
            .entries
            .last_key_value()
            .map(|(_, entry)| entry.clone())
    }

    fn oldest(&self) -> Option<TimelineEntry<M>> {
        self.state()
            .entries
            .first_key_value()
            .map(|(_, entry)| entry.clone())
    }

    fn to_list(&self) -> Vec<TimelineEntry<M>> {
        let state = self.state();
        state.ordered(self.order).cloned().collect()
    }

    fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.dividers.clear();
    }
}

impl<M> fmt::Debug for OrderedMessageStore<M> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OrderedMessageStore")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn two_day_store(order: Order) -> OrderedMessageStore<ChatMessage> {
        OrderedMessageStore::with_day_keyer(order, |created_at: i64| {
            if created_at < 250 {
                "day-1".to_string()
            } else {
                "day-2".to_string()
            }
        })
    }

    fn message(id: u64, created_at: i64) -> ChatMessage {
        ChatMessage::new(
            MessageId::new(id),
            created_at,
            "sendbird_group_channel_1",
            format!("payload-{id}"),
        )
    }

    fn anchors(store: &OrderedMessageStore<ChatMessage>) -> Vec<i64> {
        store
            .to_list()
            .iter()
            .map(TimelineEntry::created_at)
            .collect()
    }

    #[test]
    fn ascending_store_reads_oldest_first() {
        let store = two_day_store(Order::Ascending);
        store.add(&message(3, 300));
        store.add(&message(1, 100));
        store.add(&message(2, 200));

        assert_eq!(anchors(&store), vec![99, 100, 200, 299, 300]);
        assert_eq!(store.len(), 5);
        assert_eq!(store.message_count(), 3);
    }

    #[test]
    fn latest_and_oldest_do_not_depend_on_order() {
        for order in [Order::Ascending, Order::Descending] {
            let store = two_day_store(order);
            store.add(&message(1, 100));
            store.add(&message(2, 300));

            let latest = store.latest().unwrap();
            assert_eq!(latest.as_message().map(|m| m.id), Some(MessageId::new(2)));

            // The earliest day's divider sorts before all of its messages.
            let oldest = store.oldest().unwrap();
            assert_eq!(oldest.as_divider().map(|d| d.anchor_created_at), Some(99));
        }
    }

    #[test]
    fn empty_store_answers_without_faults() {
        let store = two_day_store(Order::Descending);
        assert!(store.is_empty());
        assert!(store.latest().is_none());
        assert!(store.oldest().is_none());
        assert!(!store.delete(&message(1, 100)));
        assert!(!store.delete_by_message_id(MessageId::new(1)));
        assert!(!store.update(&message(1, 100)));
        assert!(store.get_by_id(MessageId::new(1)).is_none());
        assert!(store.get_by_created_at(100).is_empty());
    }

    #[test]
    fn divider_does_not_evict_message_one_tick_earlier() {
        // 249 is the last tick of day-1, 250 the first of day-2.
        let store = two_day_store(Order::Ascending);
        store.add(&message(1, 249));
        store.add(&message(2, 250));

        let list = store.to_list();
        assert_eq!(list.len(), 4);
        assert_eq!(list[1].as_message().map(|m| m.id), Some(MessageId::new(1)));
        assert_eq!(list[2].as_divider().map(|d| d.date_key.as_str()), Some("day-2"));
        assert_eq!(store.get_by_created_at(249).len(), 2);

        // Deleting the day-1 message must not take the day-2 divider with it.
        assert!(store.delete(&message(1, 249)));
        assert!(store.divider_for_day("day-1").is_none());
        assert_eq!(
            store.divider_for_day("day-2"),
            Some(TimelineDivider::new("day-2", 249))
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn delete_keeps_divider_anchor_when_earliest_message_goes() {
        let store = two_day_store(Order::Ascending);
        store.add(&message(1, 100));
        store.add(&message(2, 200));

        assert!(store.delete(&message(1, 100)));
        assert_eq!(
            store.divider_for_day("day-1"),
            Some(TimelineDivider::new("day-1", 99))
        );
        assert_eq!(anchors(&store), vec![99, 200]);
    }

    #[test]
    fn delete_matches_on_timestamp_not_payload() {
        let store = two_day_store(Order::Ascending);
        store.add(&message(1, 100));

        assert!(store.delete(&message(42, 100)));
        assert!(store.is_empty());
    }

    #[test]
    fn delete_by_message_id_removes_the_matching_slot() {
        let store = two_day_store(Order::Descending);
        store.add(&message(1, 100));
        store.add(&message(2, 200));

        assert!(store.delete_by_message_id(MessageId::new(2)));
        assert!(!store.delete_by_message_id(MessageId::new(2)));
        assert_eq!(store.messages(), vec![message(1, 100)]);
    }

    #[test]
    fn update_replaces_payload_in_place() {
        let store = two_day_store(Order::Descending);
        store.add(&message(1, 100));

        let mut edited = message(1, 100);
        edited.payload = "edited".to_string();
        assert!(store.update(&edited));
        assert_eq!(
            store.get_by_id(MessageId::new(1)).map(|m| m.payload),
            Some("edited".to_string())
        );
        assert_eq!(store.dividers(), vec![TimelineDivider::new("day-1", 99)]);
    }

    #[test]
    fn update_never_rewrites_a_divider_slot() {
        let store = two_day_store(Order::Ascending);
        store.add(&message(1, 100));

        // 99 only holds the day-1 divider.
        assert!(!store.update(&message(5, 99)));
        assert_eq!(anchors(&store), vec![99, 100]);
    }

    #[test]
    fn stored_copy_is_detached_from_caller() {
        let store = two_day_store(Order::Ascending);
        let mut original = message(1, 100);
        store.add(&original);
        original.payload = "mutated after enqueue".to_string();

        assert_eq!(
            store.get_by_id(MessageId::new(1)).map(|m| m.payload),
            Some("payload-1".to_string())
        );
    }

    #[test]
    fn clear_resets_day_index() {
        let store = two_day_store(Order::Ascending);
        store.add(&message(1, 100));
        store.clear();
        assert!(store.is_empty());
        assert!(store.divider_for_day("day-1").is_none());

        store.add(&message(2, 200));
        assert_eq!(store.dividers(), vec![TimelineDivider::new("day-1", 199)]);
    }

    #[test]
    fn panicking_day_keyer_leaves_timeline_consistent() {
        use std::panic::{AssertUnwindSafe, catch_unwind};
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let failing = Arc::new(AtomicBool::new(false));
        let keyer_failing = Arc::clone(&failing);
        let store = OrderedMessageStore::with_day_keyer(Order::Ascending, move |created_at: i64| {
            assert!(!keyer_failing.load(Ordering::SeqCst), "calendar unavailable");
            format!("day-{}", created_at / 1_000)
        });
        store.add(&message(1, 100));

        failing.store(true, Ordering::SeqCst);
        let outcome = catch_unwind(AssertUnwindSafe(|| store.delete(&message(1, 100))));
        assert!(outcome.is_err());
        failing.store(false, Ordering::SeqCst);

        // The lock is poisoned but the state was never half-updated.
        assert_eq!(store.messages(), vec![message(1, 100)]);
        assert_eq!(store.dividers(), vec![TimelineDivider::new("day-0", 99)]);

        assert!(store.delete(&message(1, 100)));
        assert!(store.is_empty());
        assert!(store.divider_for_day("day-0").is_none());
    }

    #[test]
    fn divider_precedes_message_at_minimum_timestamp() {
        let store = OrderedMessageStore::with_day_keyer(Order::Ascending, |_: i64| {
            "floor".to_string()
        });
        store.add(&message(1, i64::MIN));
        store.add(&message(2, i64::MIN + 1));

        let list = store.to_list();
        assert_eq!(list.len(), 3);
        assert_eq!(
            list[0].as_divider(),
            Some(&TimelineDivider::new("floor", i64::MIN))
        );
        assert_eq!(list[1].as_message().map(|m| m.id), Some(MessageId::new(1)));
        assert_eq!(list[2].as_message().map(|m| m.id), Some(MessageId::new(2)));

        assert!(store.delete(&message(1, i64::MIN)));
        assert!(store.delete(&message(2, i64::MIN + 1)));
        assert!(store.is_empty());
    }
}
