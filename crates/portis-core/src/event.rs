use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::datetime::parse_iso_date;

pub const MAINTENANCE_TYPE: &str = "mantenimiento_programado";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DayEventKind {
    Extra,
    Guardia,
    Vacaciones,
    Festivo,
}

impl DayEventKind {
    pub const ALL: [DayEventKind; 4] = [
        DayEventKind::Extra,
        DayEventKind::Guardia,
        DayEventKind::Vacaciones,
        DayEventKind::Festivo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DayEventKind::Extra => "extra",
            DayEventKind::Guardia => "guardia",
            DayEventKind::Vacaciones => "vacaciones",
            DayEventKind::Festivo => "festivo",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == lower)
    }
}

impl fmt::Display for DayEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayEventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            anyhow!("unknown day event type: {s} (expected extra, guardia, vacaciones or festivo)")
        })
    }
}

/// A calendar record as it sits in the backing collection.
///
/// Every field except `id` is optional because the collection is shared
/// with other clients and is not schema-checked. Use
/// [`CalendarEvent::try_from`] to get a validated view.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub date: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Fields of a maintenance entry that come from the maintenance ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceDetails {
    pub maintenance_id: String,
    pub location: Option<String>,
    pub scheduled_time: Option<String>,
    pub notes: Option<String>,
}

impl EventRecord {
    pub fn day_event(date: NaiveDate, kind: DayEventKind, hours: Option<f64>) -> Self {
        Self {
            date: Some(date.format("%Y-%m-%d").to_string()),
            kind: Some(kind.as_str().to_string()),
            hours: hours.map(Value::from),
            ..Self::default()
        }
    }

    pub fn maintenance(date: NaiveDate, details: &MaintenanceDetails) -> Self {
        Self {
            date: Some(date.format("%Y-%m-%d").to_string()),
            kind: Some(MAINTENANCE_TYPE.to_string()),
            maintenance_id: Some(details.maintenance_id.clone()),
            location: details.location.clone(),
            scheduled_time: details.scheduled_time.clone(),
            notes: details.notes.clone(),
            ..Self::default()
        }
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        self.date.as_deref().and_then(parse_iso_date)
    }

    pub fn day_event_kind(&self) -> Option<DayEventKind> {
        self.kind.as_deref().and_then(DayEventKind::parse)
    }

    pub fn is_day_event(&self) -> bool {
        self.day_event_kind().is_some()
    }

    pub fn is_maintenance(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| kind.trim() == MAINTENANCE_TYPE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayEvent {
    pub record_id: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: DayEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMaintenance {
    pub record_id: String,
    pub date: NaiveDate,
    pub maintenance_id: String,
    pub location: Option<String>,
    pub scheduled_time: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalendarEvent {
    Day(DayEvent),
    Maintenance(ScheduledMaintenance),
}

impl CalendarEvent {
    pub fn date(&self) -> NaiveDate {
        match self {
            CalendarEvent::Day(event) => event.date,
            CalendarEvent::Maintenance(entry) => entry.date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordIssue {
    #[error("record has no date")]
    MissingDate,
    #[error("record date is not YYYY-MM-DD: {0}")]
    InvalidDate(String),
    #[error("record has no type")]
    MissingType,
    #[error("unknown record type: {0}")]
    UnknownType(String),
    #[error("overtime hours are not a non-negative number: {0}")]
    InvalidHours(String),
    #[error("maintenance entry has no maintenanceId")]
    MissingMaintenanceId,
}

impl TryFrom<&EventRecord> for CalendarEvent {
    type Error = RecordIssue;

    fn try_from(record: &EventRecord) -> Result<Self, Self::Error> {
        let raw_date = record
            .date
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(RecordIssue::MissingDate)?;
        let date =
            parse_iso_date(raw_date).ok_or_else(|| RecordIssue::InvalidDate(raw_date.to_string()))?;

        let raw_kind = record
            .kind
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(RecordIssue::MissingType)?;

        if raw_kind == MAINTENANCE_TYPE {
            let maintenance_id = record
                .maintenance_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .ok_or(RecordIssue::MissingMaintenanceId)?;
            return Ok(CalendarEvent::Maintenance(ScheduledMaintenance {
                record_id: record.id.clone(),
                date,
                maintenance_id,
                location: record.location.clone(),
                scheduled_time: record.scheduled_time.clone(),
                notes: record.notes.clone(),
            }));
        }

        let kind = DayEventKind::parse(raw_kind)
            .ok_or_else(|| RecordIssue::UnknownType(raw_kind.to_string()))?;

        let hours = if kind == DayEventKind::Extra {
            parse_hours(record.hours.as_ref())?
        } else {
            None
        };

        Ok(CalendarEvent::Day(DayEvent {
            record_id: record.id.clone(),
            date,
            kind,
            hours,
            created_at: record.created_at,
        }))
    }
}

// Older clients wrote hours straight from a text input, so both numbers
// and numeric strings show up in the collection.
fn parse_hours(raw: Option<&Value>) -> Result<Option<f64>, RecordIssue> {
    let value = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(Value::String(text)) => text.trim().replace(',', ".").parse::<f64>().ok(),
        Some(_) => None,
    };

    match value {
        Some(hours) if hours.is_finite() && hours >= 0.0 => Ok(Some(hours)),
        _ => Err(RecordIssue::InvalidHours(
            raw.map(ToString::to_string).unwrap_or_default(),
        )),
    }
}
