//! Records produced by the serial acquisition loop.
//!
//! A [`Record`] is one line read from the meter, stamped with a sequence number
//! and the host time at which it was read. Records are shared between plugins
//! as `Arc<Record>` and are never mutated after construction.
//!
//! Marine-format sentences can be split into typed values with
//! [`Record::fields`]:
//!
//! ```text
//! $UW,20083,-1369,-940,5104887,252,466,212,4502,400,-24,-16,4430,5128453,39.9092261667,-105.0747506667,0.0040,330.9400,20171206173348
//!  │    │      │     │                                                      │              │                                  │
//! header gravity long cross              ...                             latitude       longitude        ...             datetime
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::RecordError;

/// Seconds between the UNIX epoch and the GPS epoch (1980-01-06).
pub const GPS_EPOCH_OFFSET: f64 = 315_964_800.0;

/// Seconds in one GPS week.
pub const GPS_WEEK_SECONDS: f64 = 604_800.0;

/// Meter clock format used by the trailing `datetime` field.
const METER_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Ordered field map of a marine meter sentence.
pub const MARINE_FIELDS: [&str; 19] = [
    "header", "gravity", "long", "cross", "beam", "temp", "pressure", "etemp", "vcc", "ve", "al",
    "ax", "status", "checksum", "latitude", "longitude", "speed", "course", "datetime",
];

/// One unit of data read from the serial device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    seq: u64,
    timestamp: DateTime<Utc>,
    line: String,
}

impl Record {
    /// Creates a record with an explicit timestamp.
    pub fn new(seq: u64, timestamp: DateTime<Utc>, line: impl Into<String>) -> Self {
        Self {
            seq,
            timestamp,
            line: line.into(),
        }
    }

    /// Creates a record stamped with the current UTC time.
    pub fn now(seq: u64, line: impl Into<String>) -> Self {
        Self::new(seq, Utc::now(), line)
    }

    /// Monotonic sequence number assigned by the producer.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Host time at which the record was read.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The raw line, without its line terminator.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns `true` when the line carries no data.
    pub fn is_empty(&self) -> bool {
        self.line.trim().is_empty()
    }

    /// Extracts the selected marine fields from the line.
    ///
    /// Values are cast according to the field: `header` stays text,
    /// `gravity`/`latitude`/`longitude`/`speed`/`course` are floats,
    /// `datetime` is the meter clock as UNIX seconds, everything else is an
    /// integer. A value that does not parse is kept as [`FieldValue::Text`].
    pub fn fields(&self, selection: &FieldSelection) -> Result<Fields, RecordError> {
        if self.is_empty() {
            return Err(RecordError::Empty);
        }
        let values: Vec<&str> = self.line.trim().split(',').collect();
        let mut fields = Fields::new();

        for (index, name) in MARINE_FIELDS.iter().enumerate() {
            if !selection.contains(name) {
                continue;
            }
            let raw = values.get(index).ok_or(RecordError::TooFewFields {
                field: name,
                needed: index + 1,
                got: values.len(),
            })?;
            fields.insert(name, cast_field(name, raw, self.timestamp));
        }

        Ok(fields)
    }
}

/// A typed value extracted from a record line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer sensor counts.
    Int(i64),
    /// Floating point quantities (gravity, coordinates, speed, course) and
    /// the meter clock in UNIX seconds.
    Float(f64),
    /// Anything that is not numeric, or failed to parse.
    Text(String),
}

impl FieldValue {
    /// Returns the value as `f64` when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// Extracted fields keyed by their marine field name.
pub type Fields = BTreeMap<&'static str, FieldValue>;

/// Which marine fields [`Record::fields`] should extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelection {
    names: Vec<String>,
}

impl FieldSelection {
    /// Selects the given field names (case-insensitive).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Selects every field of the marine sentence.
    pub fn all() -> Self {
        Self::new(MARINE_FIELDS)
    }

    fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl Default for FieldSelection {
    /// Gravity, long/cross accelerations, position and meter time.
    fn default() -> Self {
        Self::new([
            "gravity",
            "long",
            "cross",
            "latitude",
            "longitude",
            "datetime",
        ])
    }
}

fn cast_field(name: &str, raw: &str, fallback_time: DateTime<Utc>) -> FieldValue {
    let raw = raw.trim();
    match name {
        "header" => FieldValue::Text(raw.to_string()),
        "gravity" | "latitude" | "longitude" | "speed" | "course" => raw
            .parse::<f64>()
            .map(FieldValue::Float)
            .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
        "datetime" => FieldValue::Float(unix_seconds(
            parse_meter_time(raw).unwrap_or(fallback_time),
        )),
        _ => raw
            .parse::<i64>()
            .map(FieldValue::Int)
            .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
    }
}

/// Parses the meter clock (`YYYYmmddHHMMSS`), interpreted as UTC.
pub fn parse_meter_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), METER_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn unix_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

/// Converts GPS week time to a UNIX timestamp in seconds.
///
/// Leap seconds are not subtracted.
pub fn gps_to_unix(week: u32, week_seconds: f64) -> f64 {
    GPS_EPOCH_OFFSET + f64::from(week) * GPS_WEEK_SECONDS + week_seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "$UW,20083,-1369,-940,5104887,252,466,212,4502,400,-24,-16,4430,5128453,39.9092261667,-105.0747506667,0.0040,330.9400,20171206173348";

    #[test]
    fn test_default_selection_extracts_typed_values() {
        let record = Record::now(1, SAMPLE);
        let fields = record.fields(&FieldSelection::default()).unwrap();

        assert_eq!(fields.len(), 6);
        assert_eq!(fields["gravity"], FieldValue::Float(20083.0));
        assert_eq!(fields["long"], FieldValue::Int(-1369));
        assert_eq!(fields["cross"], FieldValue::Int(-940));
        assert_eq!(fields["latitude"], FieldValue::Float(39.9092261667));
        // 2017-12-06 17:33:48 UTC
        assert_eq!(fields["datetime"], FieldValue::Float(1_512_581_628.0));
    }

    #[test]
    fn test_unparsable_meter_time_falls_back_to_record_time() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let line = SAMPLE.replace("20171206173348", "00000000000022");
        let record = Record::new(7, at, line);
        let fields = record.fields(&FieldSelection::new(["datetime"])).unwrap();
        assert_eq!(fields["datetime"], FieldValue::Float(at.timestamp() as f64));
    }

    #[test]
    fn test_bad_integer_is_kept_as_text() {
        let line = SAMPLE.replace(",252,", ",n/a,");
        let record = Record::now(2, line);
        let fields = record.fields(&FieldSelection::new(["temp"])).unwrap();
        assert_eq!(fields["temp"], FieldValue::Text("n/a".into()));
    }

    #[test]
    fn test_short_line_reports_missing_field() {
        let record = Record::now(3, "$UW,1,2");
        let err = record.fields(&FieldSelection::default()).unwrap_err();
        assert!(matches!(
            err,
            RecordError::TooFewFields { field: "cross", needed: 4, got: 3 }
        ));
    }

    #[test]
    fn test_empty_line_is_rejected() {
        let record = Record::now(4, "   ");
        assert!(matches!(
            record.fields(&FieldSelection::all()),
            Err(RecordError::Empty)
        ));
    }

    #[test]
    fn test_gps_to_unix() {
        assert_eq!(gps_to_unix(0, 0.0), GPS_EPOCH_OFFSET);
        assert_eq!(gps_to_unix(1980, 1.5), 315_964_800.0 + 1980.0 * 604_800.0 + 1.5);
    }
}
