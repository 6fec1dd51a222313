use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

pub const INVALID_TIMESTAMP_MESSAGE: &str =
    "Invalid timestamp format. Expected ISO 8601 format (YYYY-MM-DDTHH:MM:SSZ).";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccelerometerData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GpsData {
    pub latitude: f64,
    pub longitude: f64,
}

/// Raw sample produced by a vehicle agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentData {
    pub user_id: i64,
    pub accelerometer: AccelerometerData,
    pub gps: GpsData,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Agent sample together with the road state the hub classified it as.
/// This is the body accepted by the store on create (as a list) and on update.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessedAgentData {
    pub road_state: String,
    pub agent_data: AgentData,
}

/// Flattened row as the store keeps it, minus the id it assigns.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub road_state: String,
    pub user_id: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// Stored row returned by every read endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessedAgentDataInDB {
    pub id: i64,
    pub road_state: String,
    pub user_id: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&ProcessedAgentData> for NewRecord {
    fn from(data: &ProcessedAgentData) -> Self {
        let agent = &data.agent_data;
        NewRecord {
            road_state: data.road_state.clone(),
            user_id: agent.user_id,
            x: agent.accelerometer.x,
            y: agent.accelerometer.y,
            z: agent.accelerometer.z,
            latitude: agent.gps.latitude,
            longitude: agent.gps.longitude,
            timestamp: agent.timestamp,
        }
    }
}

impl ProcessedAgentDataInDB {
    pub fn from_record(id: i64, record: NewRecord) -> Self {
        ProcessedAgentDataInDB {
            id,
            road_state: record.road_state,
            user_id: record.user_id,
            x: record.x,
            y: record.y,
            z: record.z,
            latitude: record.latitude,
            longitude: record.longitude,
            timestamp: record.timestamp,
        }
    }
}

impl fmt::Display for ProcessedAgentDataInDB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} user {} [{}] at ({}, {}) {}",
            self.id,
            self.user_id,
            self.road_state,
            self.latitude,
            self.longitude,
            self.timestamp.to_rfc3339()
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("{}", INVALID_TIMESTAMP_MESSAGE)]
pub struct TimestampError;

// Naive layouts tried after RFC 3339; values without an offset are taken as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Parses an ISO 8601 timestamp into UTC.
///
/// Offsets are honoured and converted; naive date-times and bare dates are
/// interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or(TimestampError)
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(de::Error::custom)
}
