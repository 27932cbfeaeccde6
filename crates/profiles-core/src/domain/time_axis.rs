use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, Duration, Month, PrimitiveDateTime, Time};

use crate::domain::TimePoint;
use crate::ValidationError;

/// Upper bound on generated ticks for consecutive and relative axes.
pub const MAX_COUNT: u32 = 100;

/// Resolution of a time-part, ordered from most to least specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    pub const ALL: [Self; 7] = [
        Self::Minute,
        Self::Hour,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Quarter,
        Self::Year,
    ];

    /// Name understood by SQL `date_trunc`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }

    pub const fn is_calendar(self) -> bool {
        matches!(self, Self::Month | Self::Quarter | Self::Year)
    }

    /// Start of the unit containing `instant`. Weeks start on Monday.
    pub fn truncate(self, instant: PrimitiveDateTime) -> PrimitiveDateTime {
        let date = instant.date();
        let start_of = |date: Date| PrimitiveDateTime::new(date, Time::MIDNIGHT);
        let first_of = |month: Month| {
            Date::from_calendar_date(date.year(), month, 1)
                .map(start_of)
                .unwrap_or(instant)
        };

        match self {
            Self::Minute => PrimitiveDateTime::new(
                date,
                Time::from_hms(instant.hour(), instant.minute(), 0).unwrap_or(Time::MIDNIGHT),
            ),
            Self::Hour => PrimitiveDateTime::new(
                date,
                Time::from_hms(instant.hour(), 0, 0).unwrap_or(Time::MIDNIGHT),
            ),
            Self::Day => start_of(date),
            Self::Week => {
                let back = Duration::days(i64::from(date.weekday().number_days_from_monday()));
                start_of(date.checked_sub(back).unwrap_or(date))
            }
            Self::Month => first_of(date.month()),
            Self::Quarter => {
                let month = (u8::from(date.month()) - 1) / 3 * 3 + 1;
                Month::try_from(month).map(first_of).unwrap_or(instant)
            }
            Self::Year => first_of(Month::January),
        }
    }

    /// Move `steps` units away from `instant`.
    ///
    /// Month, quarter, and year steps use calendar arithmetic and clamp the
    /// day to the target month's length; shorter units add a fixed duration.
    pub fn offset(self, instant: PrimitiveDateTime, steps: i64) -> Option<PrimitiveDateTime> {
        match self {
            Self::Minute => instant.checked_add(Duration::minutes(steps)),
            Self::Hour => instant.checked_add(Duration::hours(steps)),
            Self::Day => instant.checked_add(Duration::days(steps)),
            Self::Week => instant.checked_add(Duration::weeks(steps)),
            Self::Month => add_months(instant, steps),
            Self::Quarter => add_months(instant, steps.checked_mul(3)?),
            Self::Year => add_months(instant, steps.checked_mul(12)?),
        }
    }
}

fn add_months(instant: PrimitiveDateTime, months: i64) -> Option<PrimitiveDateTime> {
    let date = instant.date();
    let total = i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1 + months;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(total.rem_euclid(12) + 1).ok()?).ok()?;

    let mut day = date.day();
    let shifted = loop {
        match Date::from_calendar_date(year, month, day) {
            Ok(shifted) => break shifted,
            Err(_) if day > 28 => day -= 1,
            Err(_) => return None,
        }
    };
    Some(PrimitiveDateTime::new(shifted, instant.time()))
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "min" | "minute" => Ok(Self::Minute),
            "hr" | "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "year" => Ok(Self::Year),
            other => Err(ValidationError::InvalidTimeUnit {
                value: other.to_owned(),
            }),
        }
    }
}

/// One contiguous chunk of time on an axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimePart {
    pub slug: String,
    pub name: String,
    pub instant: TimePoint,
    pub unit: TimeUnit,
}

impl TimePart {
    /// Build the part of `unit` containing `instant`, slugged under `axis_slug`.
    pub fn new(axis_slug: &str, instant: TimePoint, unit: TimeUnit) -> Self {
        let instant = TimePoint::new(unit.truncate(instant.into_inner()));
        let inner = instant.into_inner();
        let (year, month, day) = (inner.year(), u8::from(inner.month()), inner.day());
        let date = format!("{year:04}-{month:02}-{day:02}");
        let hour = inner.hour();
        let minute = inner.minute();

        let (period, name) = match unit {
            TimeUnit::Year => (format!("{year}"), format!("{year}")),
            TimeUnit::Quarter => {
                let quarter = (month - 1) / 3 + 1;
                (format!("{year}-Q{quarter}"), format!("Q{quarter} {year}"))
            }
            TimeUnit::Month => (format!("{year}-{month:02}"), format!("{month}/{year}")),
            TimeUnit::Week => (date.clone(), format!("Week of {date}")),
            TimeUnit::Day => (date.clone(), date),
            TimeUnit::Hour => (
                format!("{date}T{hour:02}"),
                format!("{date} {hour:02}:00"),
            ),
            TimeUnit::Minute => (
                format!("{date}T{hour:02}:{minute:02}"),
                format!("{date} {hour:02}:{minute:02}"),
            ),
        };

        Self {
            slug: format!("{axis_slug}:{period}"),
            name,
            instant,
            unit,
        }
    }

    /// Stable cache key: hex SHA-256 of the unit and truncated instant.
    pub fn storage_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.unit.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.instant.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// SQL expression truncating this part's instant to its unit.
    pub fn trunc_sql(&self) -> String {
        format!(
            "date_trunc('{}', '{}'::timestamp)",
            self.unit.as_str(),
            self.instant
        )
    }

    pub fn year(&self) -> i32 {
        self.instant.year()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Backward,
    Forward,
}

impl Direction {
    const fn sign(self) -> i64 {
        match self {
            Self::Backward => -1,
            Self::Forward => 1,
        }
    }
}

/// How an axis produces its time-parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeAxisKind {
    /// Explicit list of instants.
    Static { instants: Vec<TimePoint> },
    /// Evenly stepped instants from two of `start`, `end`, and `ticks`.
    StaticConsecutive {
        #[serde(default)]
        start: Option<TimePoint>,
        #[serde(default)]
        end: Option<TimePoint>,
        #[serde(default)]
        ticks: Option<u32>,
    },
    /// Anchored `start_offset` units from the moment of evaluation.
    Relative {
        start_offset: i64,
        ticks: u32,
        #[serde(default)]
        direction: Direction,
    },
    /// Ad-hoc axis over pre-built parts.
    Custom { parts: Vec<TimePart> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeAxis {
    pub slug: String,
    pub name: String,
    pub unit: TimeUnit,
    #[serde(flatten)]
    pub kind: TimeAxisKind,
    #[serde(skip)]
    parts: OnceLock<Vec<TimePart>>,
}

impl TimeAxis {
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        unit: TimeUnit,
        kind: TimeAxisKind,
    ) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            unit,
            kind,
            parts: OnceLock::new(),
        }
    }

    /// Axis over an explicit set of parts, slugged by their sorted slugs.
    pub fn from_time_parts(parts: Vec<TimePart>) -> Result<Self, ValidationError> {
        let unit = parts
            .first()
            .map(|part| part.unit)
            .ok_or_else(|| ValidationError::InvalidTimeAxis {
                slug: String::from("custom"),
                reason: String::from("a custom axis needs at least one time-part"),
            })?;
        let mut slugs: Vec<&str> = parts.iter().map(|part| part.slug.as_str()).collect();
        slugs.sort_unstable();
        let slug = slugs.join("-");

        Ok(Self::new(
            slug.clone(),
            format!("Custom Time Axis ({slug})"),
            unit,
            TimeAxisKind::Custom { parts },
        ))
    }

    /// Materialized parts, computed against the current time on first use.
    pub fn time_parts(&self) -> &[TimePart] {
        self.parts.get_or_init(|| self.time_parts_at(TimePoint::now()))
    }

    /// Parts as they would be evaluated at `now`, without memoizing.
    pub fn time_parts_at(&self, now: TimePoint) -> Vec<TimePart> {
        let unit = self.unit;
        let part = |instant: PrimitiveDateTime| TimePart::new(&self.slug, instant.into(), unit);

        match &self.kind {
            TimeAxisKind::Static { instants } => instants
                .iter()
                .map(|instant| part(instant.into_inner()))
                .collect(),
            TimeAxisKind::StaticConsecutive { start, end, ticks } => {
                let count = ticks.unwrap_or(MAX_COUNT).min(MAX_COUNT);
                let (anchor, sign) = match (start, end) {
                    (Some(start), _) => (*start, 1),
                    (None, Some(end)) => (*end, -1),
                    (None, None) => return Vec::new(),
                };
                let stop = start.and(*end).map(TimePoint::into_inner);

                let mut instants = Vec::new();
                for distance in 0..i64::from(count) {
                    let Some(next) = unit.offset(anchor.into_inner(), distance * sign) else {
                        break;
                    };
                    if stop.is_some_and(|stop| next > stop) {
                        break;
                    }
                    instants.push(next);
                }
                instants.sort();
                instants.into_iter().map(part).collect()
            }
            TimeAxisKind::Relative {
                start_offset,
                ticks,
                direction,
            } => {
                let Some(anchor) = unit.offset(now.into_inner(), *start_offset) else {
                    return Vec::new();
                };
                (0..i64::from((*ticks).min(MAX_COUNT)))
                    .filter_map(|distance| unit.offset(anchor, distance * direction.sign()))
                    .map(part)
                    .collect()
            }
            TimeAxisKind::Custom { parts } => parts.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidTimeAxis {
            slug: self.slug.clone(),
            reason: reason.to_owned(),
        };

        match &self.kind {
            TimeAxisKind::Static { instants } if instants.is_empty() => {
                Err(invalid("static axis has no instants"))
            }
            TimeAxisKind::StaticConsecutive { start, end, ticks } => {
                let set = [start.is_some(), end.is_some(), ticks.is_some()]
                    .into_iter()
                    .filter(|present| *present)
                    .count();
                if set < 2 {
                    return Err(invalid("requires two of start, end, and ticks"));
                }
                if ticks.is_some_and(|ticks| ticks == 0 || ticks > MAX_COUNT) {
                    return Err(invalid("ticks must be between 1 and 100"));
                }
                if let (Some(start), Some(end)) = (start, end) {
                    if end < start {
                        return Err(invalid("end precedes start"));
                    }
                }
                Ok(())
            }
            TimeAxisKind::Relative { ticks, .. } if *ticks == 0 || *ticks > MAX_COUNT => {
                Err(invalid("ticks must be between 1 and 100"))
            }
            TimeAxisKind::Custom { parts } if parts.is_empty() => {
                Err(invalid("custom axis has no time-parts"))
            }
            TimeAxisKind::Static { .. } | TimeAxisKind::Custom { .. } => {
                let mut seen = std::collections::BTreeSet::new();
                match self
                    .time_parts_at(TimePoint::now())
                    .into_iter()
                    .find(|part| !seen.insert(part.slug.clone()))
                {
                    Some(part) => Err(invalid(&format!("duplicate time-part {}", part.slug))),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}
