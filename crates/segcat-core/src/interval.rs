use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

/// Half-open time range `[start, end)`.
///
/// Ordering is by `start`, then by `end`. The wire form is `"{start}/{end}"` with both
/// bounds in RFC 3339.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    /// Creates an interval, rejecting empty or inverted ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ValidationError` when `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if start >= end {
            return Err(CoreError::ValidationError(format!(
                "interval start {} must be before end {}",
                format_instant(&start),
                format_instant(&end)
            )));
        }
        Ok(Self { start, end })
    }

    /// The range used to ask for "everything": the epoch up to the year 3000.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            start: Utc
                .with_ymd_and_hms(1970, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: Utc
                .with_ymd_and_hms(3000, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns `true` when the two ranges share at least one instant.
    #[must_use]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns `true` when `other` lies entirely within `self`.
    #[must_use]
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    #[must_use]
    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Intersection of the two ranges, if any.
    #[must_use]
    pub fn overlap(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Interval { start, end })
    }

    /// Portions of `self` not covered by `other`: zero, one or two ranges in ascending order.
    #[must_use]
    pub fn minus(&self, other: &Interval) -> Vec<Interval> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut pieces = Vec::with_capacity(2);
        if self.start < other.start {
            pieces.push(Interval {
                start: self.start,
                end: other.start,
            });
        }
        if other.end < self.end {
            pieces.push(Interval {
                start: other.end,
                end: self.end,
            });
        }
        pieces
    }
}

/// Renders an instant the way segment identifiers and payloads expect it.
pub(crate) fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_instant(raw: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| CoreError::ValidationError(format!("invalid instant `{raw}`: {err}")))
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            format_instant(&self.start),
            format_instant(&self.end)
        )
    }
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('/')
            .ok_or_else(|| CoreError::ValidationError(format!("invalid interval `{s}`")))?;
        Interval::new(parse_instant(start)?, parse_instant(end)?)
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
