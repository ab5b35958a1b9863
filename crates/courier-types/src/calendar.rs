use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A labelled span of calendar time. `start <= end` is a caller contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub label: String,
}

impl TimeInterval {
    pub fn new(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        label: impl Into<String>,
    ) -> Self {
        debug_assert!(start <= end, "interval start must not be after its end");
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// One calendar day, exactly 24 hours long, in a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    day_start: DateTime<FixedOffset>,
    day_end: DateTime<FixedOffset>,
}

impl DayWindow {
    pub fn starting_at(day_start: DateTime<FixedOffset>) -> Self {
        Self {
            day_start,
            day_end: day_start + Duration::days(1),
        }
    }

    /// Midnight-to-midnight window for `date` at `offset`.
    pub fn for_date(date: NaiveDate, offset: FixedOffset) -> Self {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let utc_midnight = local_midnight - Duration::seconds(offset.local_minus_utc() as i64);
        Self::starting_at(DateTime::from_naive_utc_and_offset(utc_midnight, offset))
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.day_start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.day_end
    }

    pub fn offset(&self) -> FixedOffset {
        *self.day_start.offset()
    }
}
