use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chatrail_timeline::{
    ChatMessage, MessageId, MessageTimeline, Order, OrderedMessageStore, TimelineEntry,
    TimelineEvent, TimelineFeed,
};

const DAY: i64 = 1_000;

fn store(order: Order) -> OrderedMessageStore<ChatMessage> {
    OrderedMessageStore::with_day_keyer(order, |created_at: i64| {
        format!("day-{}", created_at.div_euclid(DAY))
    })
}

fn message(id: u64, created_at: i64) -> ChatMessage {
    ChatMessage::new(MessageId::new(id), created_at, "channel", format!("body-{id}"))
}

fn assert_consistent(entries: &[TimelineEntry<ChatMessage>], order: Order) {
    let sorted = entries.windows(2).all(|pair| match order {
        Order::Ascending => pair[0].created_at() < pair[1].created_at(),
        Order::Descending => pair[0].created_at() > pair[1].created_at(),
    });
    assert!(sorted, "snapshot lost its ordering");

    let message_days = entries
        .iter()
        .filter_map(TimelineEntry::as_message)
        .map(|message| message.created_at.div_euclid(DAY))
        .collect::<BTreeSet<_>>();
    let divider_days = entries
        .iter()
        .filter_map(TimelineEntry::as_divider)
        .map(|divider| divider.date_key.clone())
        .collect::<Vec<_>>();

    assert_eq!(divider_days.len(), message_days.len());
    for day in message_days {
        assert!(divider_days.contains(&format!("day-{day}")));
    }
}

#[test]
fn writers_and_readers_never_observe_half_updated_dividers() {
    let store = store(Order::Descending);
    let writers_done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let mut writers = Vec::new();
        for worker in 0..4_i64 {
            let store = &store;
            writers.push(scope.spawn(move || {
                for round in 0..300_i64 {
                    // Each worker owns every fourth 10ms slot.
                    let created_at = (round * 4 + worker) * 10;
                    let current = message((worker * 10_000 + round) as u64, created_at);
                    store.add(&current);
                    if round % 2 == 0 {
                        store.delete(&current);
                    }
                }
            }));
        }

        let reader = scope.spawn(|| {
            let mut snapshots = 0;
            while !writers_done.load(Ordering::Acquire) {
                assert_consistent(&store.to_list(), Order::Descending);
                snapshots += 1;
            }
            snapshots
        });

        for writer in writers {
            writer.join().unwrap();
        }
        writers_done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() >= 1);
    });

    assert_consistent(&store.to_list(), Order::Descending);
    assert_eq!(store.message_count(), 4 * 150);
}

#[test]
fn overlapping_batches_end_in_a_serial_state() {
    let store = store(Order::Ascending);
    let shared = (0..400_u64)
        .map(|index| message(index, index as i64 * 7))
        .collect::<Vec<_>>();

    std::thread::scope(|scope| {
        scope.spawn(|| store.add_all(&shared));
        scope.spawn(|| store.add_all(&shared));
        scope.spawn(|| store.update_all(&shared));
    });

    // Both adds cover the same slots, so any interleaving converges here.
    assert_eq!(store.message_count(), shared.len());
    assert_consistent(&store.to_list(), Order::Ascending);

    std::thread::scope(|scope| {
        let (front, back) = shared.split_at(200);
        scope.spawn(|| store.delete_all(front));
        scope.spawn(|| store.delete_all(back));
    });

    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn feed_and_local_sends_share_one_store() {
    let timeline = Arc::new(store(Order::Descending));
    let (sender, feed) = TimelineFeed::channel(Arc::clone(&timeline), 16);
    let worker = tokio::spawn(feed.run());

    let local = Arc::clone(&timeline);
    let local_sends = tokio::task::spawn_blocking(move || {
        for index in 0..100_u64 {
            local.add(&message(50_000 + index, index as i64 * 20 + 1));
        }
    });

    for chunk in 0..10_u64 {
        let remote = (0..10_u64)
            .map(|index| {
                let sequence = chunk * 10 + index;
                message(sequence, sequence as i64 * 20)
            })
            .collect::<Vec<_>>();
        sender.send(TimelineEvent::Added(remote)).await.unwrap();
    }
    drop(sender);

    local_sends.await.unwrap();
    let summary = worker.await.unwrap();

    assert_eq!(summary.events, 10);
    assert_eq!(summary.applied, 100);
    assert_eq!(timeline.message_count(), 200);
    assert_consistent(&timeline.to_list(), Order::Descending);
}
