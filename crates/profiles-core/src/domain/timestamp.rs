use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::ValidationError;

/// RFC3339 timestamp guaranteed to be UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::TimestampNotUtc {
            value: input.to_owned(),
        };
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| invalid())?;
        if parsed.offset() != UtcOffset::UTC {
            return Err(invalid());
        }
        Ok(Self(parsed))
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| TimePoint::from(self).to_string())
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

/// Naive UTC wall-clock instant with second precision.
///
/// Parses `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, and `YYYY-MM-DD HH:MM[:SS]`
/// (a `T` separator and trailing `Z` are accepted). Missing fields default to
/// the start of the period. Displays as `YYYY-MM-DD HH:MM:SS`, the form used
/// for SQL literals and cache expirations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint(PrimitiveDateTime);

impl TimePoint {
    pub fn now() -> Self {
        UtcDateTime::now().into()
    }

    pub const fn new(value: PrimitiveDateTime) -> Self {
        Self(value)
    }

    pub fn from_ymd(year: i32, month: u8, day: u8) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidTimePoint {
            value: format!("{year:04}-{month:02}-{day:02}"),
        };
        let month = Month::try_from(month).map_err(|_| invalid())?;
        let date = Date::from_calendar_date(year, month, day).map_err(|_| invalid())?;
        Ok(Self(PrimitiveDateTime::new(date, Time::MIDNIGHT)))
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidTimePoint {
            value: input.to_owned(),
        };
        let trimmed = input.trim();
        let (date_part, clock_part) = match trimmed.split_once([' ', 'T']) {
            Some((date, clock)) => (date, Some(clock)),
            None => (trimmed, None),
        };

        let mut fields = date_part.split('-');
        let year: i32 = fields
            .next()
            .and_then(|value| value.parse().ok())
            .ok_or_else(invalid)?;
        let month: u8 = parse_field(fields.next(), 1).ok_or_else(invalid)?;
        let day: u8 = parse_field(fields.next(), 1).ok_or_else(invalid)?;
        if fields.next().is_some() {
            return Err(invalid());
        }
        let month = Month::try_from(month).map_err(|_| invalid())?;
        let date = Date::from_calendar_date(year, month, day).map_err(|_| invalid())?;

        let clock = match clock_part {
            None => Time::MIDNIGHT,
            Some(clock) => {
                let mut fields = clock.trim_end_matches('Z').split(':');
                let hour: u8 = parse_field(fields.next(), 0).ok_or_else(invalid)?;
                let minute: u8 = parse_field(fields.next(), 0).ok_or_else(invalid)?;
                let second: u8 = parse_field(fields.next(), 0).ok_or_else(invalid)?;
                if fields.next().is_some() {
                    return Err(invalid());
                }
                Time::from_hms(hour, minute, second).map_err(|_| invalid())?
            }
        };

        Ok(Self(PrimitiveDateTime::new(date, clock)))
    }

    pub const fn into_inner(self) -> PrimitiveDateTime {
        self.0
    }

    pub const fn year(self) -> i32 {
        self.0.year()
    }

    /// Whole seconds since the Unix epoch, used for coverage arithmetic.
    pub fn unix_seconds(self) -> i64 {
        self.0.assume_utc().unix_timestamp()
    }

    pub fn checked_add(self, duration: time::Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }
}

fn parse_field(field: Option<&str>, default: u8) -> Option<u8> {
    match field {
        None => Some(default),
        Some(value) => value.parse().ok(),
    }
}

impl From<UtcDateTime> for TimePoint {
    fn from(value: UtcDateTime) -> Self {
        let inner = value.into_inner();
        let clock = Time::from_hms(inner.hour(), inner.minute(), inner.second())
            .unwrap_or(Time::MIDNIGHT);
        Self(PrimitiveDateTime::new(inner.date(), clock))
    }
}

impl From<PrimitiveDateTime> for TimePoint {
    fn from(value: PrimitiveDateTime) -> Self {
        Self(value)
    }
}

impl Display for TimePoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }
}

impl FromStr for TimePoint {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for TimePoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimePoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TimePointVisitor;

        impl Visitor<'_> for TimePointVisitor {
            type Value = TimePoint;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("a year or a YYYY-MM-DD[ HH:MM:SS] string")
            }

            fn visit_str<E: DeError>(self, value: &str) -> Result<TimePoint, E> {
                TimePoint::parse(value).map_err(E::custom)
            }

            fn visit_u64<E: DeError>(self, value: u64) -> Result<TimePoint, E> {
                TimePoint::parse(&value.to_string()).map_err(E::custom)
            }

            fn visit_i64<E: DeError>(self, value: i64) -> Result<TimePoint, E> {
                TimePoint::parse(&value.to_string()).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TimePointVisitor)
    }
}
