use chrono::{DateTime as ChronoDateTime, Months, NaiveDate, SecondsFormat, Utc};
use schemars::{json_schema, JsonSchema};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;

/// RFC 3339 timestamp as it appears in custom resource specs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChronoDateTime::parse_from_rfc3339(&s)
            .map(|dt| DateTime(dt.with_timezone(&Utc)))
            .map_err(de::Error::custom)
    }
}

impl JsonSchema for DateTime {
    fn schema_name() -> Cow<'static, str> {
        "DateTime".into()
    }

    fn json_schema(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
        json_schema!({
            "type": "string",
            "format": "date-time"
        })
    }
}

impl DateTime {
    pub fn now() -> Self {
        DateTime(Utc::now())
    }

    /// Seconds since the epoch, the representation CTFd's setup form expects.
    pub fn unix_timestamp(&self) -> i64 {
        self.0.timestamp()
    }
}

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(dt: ChronoDateTime<Utc>) -> Self {
        DateTime(dt)
    }
}

/// Calendar date serialized as `YYYY-MM-DD`, used for token expirations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateOnly(pub NaiveDate);

impl DateOnly {
    /// The date `months` calendar months after `from`, clamped to the end of shorter months.
    pub fn months_after(from: ChronoDateTime<Utc>, months: u32) -> Self {
        let date = from.date_naive();
        DateOnly(date.checked_add_months(Months::new(months)).unwrap_or(date))
    }
}

impl Serialize for DateOnly {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0.format("%Y-%m-%d"))
    }
}

impl<'de> Deserialize<'de> for DateOnly {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(DateOnly)
            .map_err(de::Error::custom)
    }
}
