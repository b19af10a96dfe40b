use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use chatrail_timeline::{
    ChatMessage, MessageId, MessageTimeline, Order, OrderedMessageStore, SettingsError,
    TimelineEntry, TimelineEvent, TimelineFeed, TimelineSettings,
};

const DAY_BOUNDARY: i64 = 250;

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    settings_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    TwoDayTimeline,
    DeleteLastOfDay,
    EarlierMessageMovesDivider,
    LookupByCreatedAt,
    TimestampCollision,
    UpdateMiss,
    ConcurrentTraffic,
    SessionFeed,
    Settings,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "two_day_timeline" => Some(Self::TwoDayTimeline),
            "delete_last_of_day" => Some(Self::DeleteLastOfDay),
            "earlier_message_moves_divider" => Some(Self::EarlierMessageMovesDivider),
            "lookup_by_created_at" => Some(Self::LookupByCreatedAt),
            "timestamp_collision" => Some(Self::TimestampCollision),
            "update_miss" => Some(Self::UpdateMiss),
            "concurrent_traffic" => Some(Self::ConcurrentTraffic),
            "session_feed" => Some(Self::SessionFeed),
            "settings" => Some(Self::Settings),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::TwoDayTimeline => "two_day_timeline",
            Self::DeleteLastOfDay => "delete_last_of_day",
            Self::EarlierMessageMovesDivider => "earlier_message_moves_divider",
            Self::LookupByCreatedAt => "lookup_by_created_at",
            Self::TimestampCollision => "timestamp_collision",
            Self::UpdateMiss => "update_miss",
            Self::ConcurrentTraffic => "concurrent_traffic",
            Self::SessionFeed => "session_feed",
            Self::Settings => "settings",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("timeline settings failed: {source}"))]
    SettingsLoad {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("session feed task failed: {source}"))]
    FeedTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::TwoDayTimeline => run_two_day_timeline(),
        Scenario::DeleteLastOfDay => run_delete_last_of_day(),
        Scenario::EarlierMessageMovesDivider => run_earlier_message_moves_divider(),
        Scenario::LookupByCreatedAt => run_lookup_by_created_at(),
        Scenario::TimestampCollision => run_timestamp_collision(),
        Scenario::UpdateMiss => run_update_miss(),
        Scenario::ConcurrentTraffic => run_concurrent_traffic(),
        Scenario::SessionFeed => run_session_feed().await,
        Scenario::Settings => run_settings(args.settings_path.as_deref()),
        Scenario::All => run_all(args.settings_path.as_deref()).await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut settings_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--settings" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-settings-value",
                    arg: "--settings",
                })?;
                settings_path = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        settings_path,
    })
}

async fn run_all(settings_path: Option<&std::path::Path>) -> RunnerResult<()> {
    run_two_day_timeline()?;
    run_delete_last_of_day()?;
    run_earlier_message_moves_divider()?;
    run_lookup_by_created_at()?;
    run_timestamp_collision()?;
    run_update_miss()?;
    run_concurrent_traffic()?;
    run_session_feed().await?;
    run_settings(settings_path)?;

    println!("all_passed=true");
    Ok(())
}

fn two_day_store() -> OrderedMessageStore<ChatMessage> {
    OrderedMessageStore::with_day_keyer(Order::Descending, |created_at: i64| {
        if created_at < DAY_BOUNDARY {
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
        "qa-channel",
        format!("message-{id}"),
    )
}

fn seeded_store() -> OrderedMessageStore<ChatMessage> {
    let store = two_day_store();
    store.add_all(&[message(1, 100), message(2, 200), message(3, 300)]);
    store
}

/// Compact rendering: `d:<day>@<anchor>` for dividers, `m<id>@<created_at>` for messages.
fn render(entries: &[TimelineEntry<ChatMessage>]) -> String {
    entries
        .iter()
        .map(|entry| match entry {
            TimelineEntry::Divider(divider) => {
                format!("d:{}@{}", divider.date_key, divider.anchor_created_at)
            }
            TimelineEntry::Message(message) => {
                format!("m{}@{}", message.id, message.created_at)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn expect_rendered(
    scenario: &'static str,
    stage: &'static str,
    store: &OrderedMessageStore<ChatMessage>,
    expected: &str,
) -> RunnerResult<()> {
    let actual = render(&store.to_list());
    println!("timeline={actual}");
    if actual != expected {
        return ScenarioFailedSnafu {
            stage,
            scenario,
            reason: format!("expected timeline {expected} but was {actual}"),
        }
        .fail();
    }
    Ok(())
}

fn run_two_day_timeline() -> RunnerResult<()> {
    let store = seeded_store();
    expect_rendered(
        "two_day_timeline",
        "scenario-two-day-timeline-assert",
        &store,
        "m3@300,d:day-2@299,m2@200,m1@100,d:day-1@99",
    )?;
    println!("runner_ok=true");
    Ok(())
}

fn run_delete_last_of_day() -> RunnerResult<()> {
    let store = seeded_store();
    let deleted = store.delete(&message(3, 300));
    println!("deleted={deleted}");
    expect_rendered(
        "delete_last_of_day",
        "scenario-delete-last-of-day-assert",
        &store,
        "m2@200,m1@100,d:day-1@99",
    )?;
    println!("runner_ok=true");
    Ok(())
}

fn run_earlier_message_moves_divider() -> RunnerResult<()> {
    let store = seeded_store();
    store.add(&message(4, 50));
    expect_rendered(
        "earlier_message_moves_divider",
        "scenario-earlier-message-assert",
        &store,
        "m3@300,d:day-2@299,m2@200,m1@100,m4@50,d:day-1@49",
    )?;
    println!("runner_ok=true");
    Ok(())
}

fn run_lookup_by_created_at() -> RunnerResult<()> {
    let store = seeded_store();
    let hit = render(&store.get_by_created_at(200));
    let miss = store.get_by_created_at(999);
    println!("hit={hit}");
    println!("miss_len={}", miss.len());

    if hit != "m2@200" || !miss.is_empty() {
        return ScenarioFailedSnafu {
            stage: "scenario-lookup-assert",
            scenario: "lookup_by_created_at",
            reason: format!("unexpected lookup results hit={hit} miss_len={}", miss.len()),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

fn run_timestamp_collision() -> RunnerResult<()> {
    let store = two_day_store();
    store.add(&message(1, 100));
    store.add(&message(2, 100));
    store.add(&message(2, 100));
    expect_rendered(
        "timestamp_collision",
        "scenario-timestamp-collision-assert",
        &store,
        "m2@100,d:day-1@99",
    )?;
    println!("runner_ok=true");
    Ok(())
}

fn run_update_miss() -> RunnerResult<()> {
    let store = seeded_store();
    let before = render(&store.to_list());
    let updated = store.update(&message(9, 150));
    println!("updated={updated}");
    expect_rendered(
        "update_miss",
        "scenario-update-miss-assert",
        &store,
        &before,
    )?;
    println!("runner_ok=true");
    Ok(())
}

fn run_concurrent_traffic() -> RunnerResult<()> {
    let store = OrderedMessageStore::with_day_keyer(Order::Ascending, |created_at: i64| {
        format!("day-{}", created_at.div_euclid(1_000))
    });

    std::thread::scope(|scope| {
        for worker in 0..4_u64 {
            let store = &store;
            scope.spawn(move || {
                let batch = (0..500_u64)
                    .map(|index| message(worker * 1_000 + index, (index * 4 + worker) as i64 * 10))
                    .collect::<Vec<_>>();
                store.add_all(&batch);
                let doomed = batch
                    .iter()
                    .filter(|message| message.id.as_u64() % 3 == 0)
                    .cloned()
                    .collect::<Vec<_>>();
                store.delete_all(&doomed);
            });
        }
    });

    let entries = store.to_list();
    let sorted = entries
        .windows(2)
        .all(|pair| pair[0].created_at() < pair[1].created_at());
    let divider_count = entries.iter().filter(|entry| entry.is_divider()).count();
    let populated_days = store
        .messages()
        .iter()
        .map(|message| message.created_at.div_euclid(1_000))
        .collect::<std::collections::BTreeSet<_>>()
        .len();

    println!("entries={}", entries.len());
    println!("sorted={sorted}");
    println!("dividers={divider_count}");
    println!("populated_days={populated_days}");

    if !sorted || divider_count != populated_days {
        return ScenarioFailedSnafu {
            stage: "scenario-concurrent-traffic-assert",
            scenario: "concurrent_traffic",
            reason: format!(
                "sorted={sorted} dividers={divider_count} populated_days={populated_days}"
            ),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_session_feed() -> RunnerResult<()> {
    let (sender, feed) = TimelineFeed::channel(Arc::new(two_day_store()), 4);
    let timeline = Arc::clone(feed.timeline());
    let worker = tokio::spawn(feed.run());

    let events = [
        TimelineEvent::Added(vec![message(1, 100), message(2, 200), message(3, 300)]),
        TimelineEvent::Updated(vec![message(2, 200)]),
        TimelineEvent::DeletedByIds(vec![MessageId::new(3)]),
    ];
    for event in events {
        if sender.send(event).await.is_err() {
            return ScenarioFailedSnafu {
                stage: "scenario-session-feed-send",
                scenario: "session_feed",
                reason: "feed stopped before all events were sent".to_string(),
            }
            .fail();
        }
    }
    drop(sender);

    let summary = worker.await.context(FeedTaskSnafu {
        stage: "scenario-session-feed-join",
    })?;
    println!("events={}", summary.events);
    println!("applied={}", summary.applied);
    expect_rendered(
        "session_feed",
        "scenario-session-feed-assert",
        &timeline,
        "m2@200,m1@100,d:day-1@99",
    )?;
    println!("runner_ok=true");
    Ok(())
}

fn run_settings(settings_path: Option<&std::path::Path>) -> RunnerResult<()> {
    let settings = match settings_path {
        Some(path) => TimelineSettings::load_from(path),
        None => TimelineSettings::load(),
    }
    .context(SettingsLoadSnafu {
        stage: "scenario-settings-load",
    })?;
    let store: OrderedMessageStore<ChatMessage> =
        OrderedMessageStore::from_settings(&settings).context(SettingsLoadSnafu {
            stage: "scenario-settings-store",
        })?;

    println!("order={}", settings.order.name());
    println!("date_format={}", settings.date_format);
    match settings.utc_offset_minutes {
        Some(minutes) => println!("utc_offset_minutes={minutes}"),
        None => println!("utc_offset_minutes=local"),
    }
    println!("store_order={}", store.order().name());
    println!("runner_ok=true");
    Ok(())
}
