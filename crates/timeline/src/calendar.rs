use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};

use super::error::{InvalidDateFormatSnafu, InvalidUtcOffsetSnafu, SettingsResult};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Groups timestamps into calendar days.
///
/// Two timestamps share a divider exactly when they map to the same key.
pub trait DayKeyer: Send + Sync {
    fn day_key(&self, created_at: i64) -> String;
}

impl<F> DayKeyer for F
where
    F: Fn(i64) -> String + Send + Sync,
{
    fn day_key(&self, created_at: i64) -> String {
        self(created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayZone {
    Local,
    Fixed(FixedOffset),
}

/// Chrono-backed day keys, formatted in the local zone or a fixed UTC offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDays {
    zone: DayZone,
    format: String,
}

impl Default for CalendarDays {
    fn default() -> Self {
        Self::local()
    }
}

impl CalendarDays {
    pub fn local() -> Self {
        Self {
            zone: DayZone::Local,
            format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn utc() -> Self {
        Self::fixed(Utc.fix())
    }

    pub fn fixed(offset: FixedOffset) -> Self {
        Self {
            zone: DayZone::Fixed(offset),
            format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn with_offset_minutes(minutes: i32) -> SettingsResult<Self> {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                InvalidUtcOffsetSnafu {
                    stage: "calendar-offset-minutes",
                    minutes,
                }
                .build()
            })?;
        Ok(Self::fixed(offset))
    }

    pub fn with_format(mut self, format: &str) -> SettingsResult<Self> {
        // An error item would make chrono's Display fail at format time.
        let malformed = format.is_empty()
            || StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
        if malformed {
            return InvalidDateFormatSnafu {
                stage: "calendar-date-format",
                format: format.to_string(),
            }
            .fail();
        }

        self.format = format.to_string();
        Ok(self)
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    fn format_utc(&self, instant: DateTime<Utc>) -> Option<String> {
        let mut key = String::new();
        let written = match self.zone {
            DayZone::Local => write!(
                key,
                "{}",
                instant.with_timezone(&Local).format(&self.format)
            ),
            DayZone::Fixed(offset) => {
                write!(key, "{}", instant.with_timezone(&offset).format(&self.format))
            }
        };
        written.ok().map(|_| key)
    }
}

impl DayKeyer for CalendarDays {
    fn day_key(&self, created_at: i64) -> String {
        if let Some(key) = DateTime::<Utc>::from_timestamp_millis(created_at)
            .and_then(|instant| self.format_utc(instant))
        {
            return key;
        }

        tracing::warn!(
            created_at,
            "timestamp is outside the calendar range, falling back to a day index key"
        );
        format!("day#{}", created_at.div_euclid(MILLIS_PER_DAY))
    }
}
