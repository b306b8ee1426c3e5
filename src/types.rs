//! Biosensor measurement types and the query vocabulary around them.
//!
//! Every wire field of a measurement may be null or missing. Only records that
//! carry both a timestamp and a numeric value are admissible into a dataset.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Measurement type tag as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MeasurementType {
    /// Heart rate outside of a recorded session
    HeartRate,
    /// Heart rate inside a recorded session
    HeartRateSession,
    /// Heart rate variability
    Hrv,
    /// Motion count
    MotionCount,
    /// Any tag this client does not know about
    Other(String),
}

impl MeasurementType {
    pub fn as_str(&self) -> &str {
        match self {
            MeasurementType::HeartRate => "heartrate",
            MeasurementType::HeartRateSession => "heartrate_session",
            MeasurementType::Hrv => "hrv",
            MeasurementType::MotionCount => "motion_count",
            MeasurementType::Other(tag) => tag,
        }
    }
}

impl From<String> for MeasurementType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "heartrate" => MeasurementType::HeartRate,
            "heartrate_session" => MeasurementType::HeartRateSession,
            "hrv" => MeasurementType::Hrv,
            "motion_count" => MeasurementType::MotionCount,
            _ => MeasurementType::Other(tag),
        }
    }
}

impl From<MeasurementType> for String {
    fn from(kind: MeasurementType) -> Self {
        match kind {
            MeasurementType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single biosensor sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Sample time (UTC)
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// What was measured
    #[serde(default, deserialize_with = "lenient_kind")]
    pub measurement_type: Option<MeasurementType>,
    /// Numeric value; numeric strings on the wire are coerced
    #[serde(
        rename = "measurement_value",
        default,
        deserialize_with = "lenient_value"
    )]
    pub value: Option<f64>,
    /// Unit, e.g. "bpm"
    #[serde(rename = "measurement_unit", default, deserialize_with = "lenient_text")]
    pub unit: Option<String>,
    /// e.g. "awake", "workout", "live"
    #[serde(default, deserialize_with = "lenient_text")]
    pub sensor_mode: Option<String>,
    /// e.g. "oura"
    #[serde(default, deserialize_with = "lenient_text")]
    pub data_source: Option<String>,
    /// e.g. "oura_ring_4"
    #[serde(default, deserialize_with = "lenient_text")]
    pub device_source: Option<String>,
}

impl Measurement {
    /// Field names a record may carry on the wire.
    pub const WIRE_FIELDS: [&'static str; 7] = [
        "timestamp",
        "measurement_type",
        "measurement_value",
        "measurement_unit",
        "sensor_mode",
        "data_source",
        "device_source",
    ];

    /// Create an admissible measurement of the given type.
    pub fn new(timestamp: DateTime<Utc>, kind: MeasurementType, value: f64) -> Self {
        Self {
            timestamp: Some(timestamp),
            measurement_type: Some(kind),
            value: Some(value),
            unit: None,
            sensor_mode: None,
            data_source: None,
            device_source: None,
        }
    }

    /// Whether this record may enter the canonical dataset.
    pub fn is_admissible(&self) -> bool {
        self.timestamp.is_some() && self.value.is_some()
    }

    pub fn is_type(&self, kind: &MeasurementType) -> bool {
        self.measurement_type.as_ref() == Some(kind)
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_kind<'de, D>(deserializer: D) -> Result<Option<MeasurementType>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.map(MeasurementType::from))
}

fn lenient_value<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

/// Render a timestamp the way the range endpoint expects it,
/// e.g. `2026-01-04T22:18:21.700Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Display selection over measurement types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Series {
    #[serde(rename = "hr_non_session")]
    HeartRate,
    #[serde(rename = "hr_session")]
    HeartRateSession,
    Hrv,
    MotionCount,
}

impl Series {
    /// Series shown when the caller makes no selection. Motion count is opt-in.
    pub fn default_selection() -> Vec<Series> {
        vec![Series::HeartRate, Series::HeartRateSession, Series::Hrv]
    }

    pub fn measurement_type(&self) -> MeasurementType {
        match self {
            Series::HeartRate => MeasurementType::HeartRate,
            Series::HeartRateSession => MeasurementType::HeartRateSession,
            Series::Hrv => MeasurementType::Hrv,
            Series::MotionCount => MeasurementType::MotionCount,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Series::HeartRate => "Heart Rate (Non-Session)",
            Series::HeartRateSession => "Heart Rate (Session)",
            Series::Hrv => "HRV",
            Series::MotionCount => "Motion Count",
        }
    }
}

impl FromStr for Series {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hr_non_session" | "heartrate" => Ok(Series::HeartRate),
            "hr_session" | "heartrate_session" => Ok(Series::HeartRateSession),
            "hrv" => Ok(Series::Hrv),
            "motion_count" | "motion" => Ok(Series::MotionCount),
            other => Err(format!("unknown series '{other}'")),
        }
    }
}

/// Query range; both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range ending at `end` and reaching back `lookback`.
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: end - lookback,
            end,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

/// What range the client keeps in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Mode {
    /// Trailing window whose end is "now" at every fetch
    Live {
        #[serde(serialize_with = "serialize_lookback")]
        lookback: Duration,
    },
    /// Caller-chosen, non-moving range
    Fixed(TimeRange),
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Live {
            lookback: Duration::hours(24),
        }
    }
}

impl Mode {
    pub fn live(lookback: Duration) -> Self {
        Mode::Live { lookback }
    }

    pub fn fixed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Mode::Fixed(TimeRange::new(start, end))
    }

    /// Concrete range for a fetch issued at `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> TimeRange {
        match self {
            Mode::Live { lookback } => TimeRange::ending_at(now, *lookback),
            Mode::Fixed(range) => *range,
        }
    }
}

fn serialize_lookback<S>(lookback: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    lookback.num_seconds().serialize(serializer)
}

/// A pull query tagged with the generation that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub generation: u64,
    pub range: TimeRange,
}

/// Ordered, admissible-only measurements from the latest accepted update.
///
/// Cloning is cheap; the records are shared and never mutated in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Arc<Vec<Measurement>>,
}

impl Dataset {
    /// Build a dataset, dropping every inadmissible record.
    pub fn from_records(records: impl IntoIterator<Item = Measurement>) -> Self {
        let records: Vec<Measurement> = records
            .into_iter()
            .filter(Measurement::is_admissible)
            .collect();
        Self {
            records: Arc::new(records),
        }
    }

    pub fn records(&self) -> &[Measurement] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.records.iter()
    }

    /// Records of one series, in dataset order.
    pub fn series(&self, series: Series) -> impl Iterator<Item = &Measurement> {
        let kind = series.measurement_type();
        self.records.iter().filter(move |m| m.is_type(&kind))
    }

    pub fn first(&self) -> Option<&Measurement> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&Measurement> {
        self.records.last()
    }
}

impl Serialize for Dataset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.records.iter())
    }
}
