use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{
  debug,
  warn
};

use crate::event::{
  CalendarEvent,
  DayEvent,
  EventRecord,
  ScheduledMaintenance
};

/// Everything recorded on one calendar
/// day.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
  pub day_event:   Option<DayEvent>,
  pub maintenance: Vec<ScheduledMaintenance>
}

impl DayBucket {
  pub fn is_empty(&self) -> bool {
    self.day_event.is_none()
      && self.maintenance.is_empty()
  }
}

pub type DayBuckets =
  BTreeMap<NaiveDate, DayBucket>;

/// Groups `records` by day.
///
/// Maintenance entries accumulate in
/// record order; any other valid record
/// becomes the day's event, the later one
/// winning if a day has several. Records
/// that fail validation are skipped and
/// reported as data-quality warnings.
#[tracing::instrument(skip_all, fields(records = records.len()))]
pub fn project(
  records: &[EventRecord]
) -> DayBuckets {
  let mut buckets = DayBuckets::new();
  let mut skipped = 0usize;

  for record in records {
    let event =
      match CalendarEvent::try_from(
        record
      ) {
        | Ok(event) => event,
        | Err(issue) => {
          skipped += 1;
          warn!(
            record = %record.id,
            issue = %issue,
            "skipping malformed calendar record"
          );
          continue;
        }
      };

    let bucket = buckets
      .entry(event.date())
      .or_default();
    match event {
      | CalendarEvent::Maintenance(
        entry
      ) => bucket.maintenance.push(entry),
      | CalendarEvent::Day(day) => {
        if let Some(previous) =
          bucket.day_event.replace(day)
        {
          warn!(
            date = %previous.date,
            replaced = %previous.record_id,
            "more than one day event on a date; keeping the later one"
          );
        }
      }
    }
  }

  debug!(
    days = buckets.len(),
    skipped,
    "projected calendar records"
  );
  buckets
}
