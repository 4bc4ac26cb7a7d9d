use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    Practice,
    Race,
}

impl fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceStatus::Practice => write!(f, "PRACTICE"),
            RaceStatus::Race => write!(f, "RACE"),
        }
    }
}

impl FromStr for RaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "practice" => Ok(RaceStatus::Practice),
            "race" => Ok(RaceStatus::Race),
            other => Err(format!("unknown race status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Racer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car: Option<String>,
}

/// A race's configuration and status.
///
/// The `id` is fixed at creation. Fields this crate does not know about are
/// kept in `extra` so records written by other clients survive a rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceRecord {
    id: String,
    pub status: RaceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lap_count: Option<u32>,
    #[serde(default)]
    pub racers: Vec<Racer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RaceRecord {
    /// Create a record with a freshly generated id.
    pub fn new(status: RaceStatus) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), status)
    }

    /// Create a record with a caller-supplied id.
    pub fn with_id(id: impl Into<String>, status: RaceStatus) -> Self {
        Self {
            id: id.into(),
            status,
            name: None,
            lap_count: None,
            racers: Vec::new(),
            created_at: Some(Utc::now()),
            extra: Map::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_lap_count(mut self, laps: u32) -> Self {
        self.lap_count = Some(laps);
        self
    }

    pub fn add_racer(&mut self, name: impl Into<String>, car: Option<String>) {
        self.racers.push(Racer {
            name: name.into(),
            car,
        });
    }

    /// Short label for listings: the name when set, otherwise the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
