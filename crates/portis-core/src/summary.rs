use serde::Serialize;

use crate::datetime::{
  days_of_year,
  year_bounds
};
use crate::event::{
  DayEvent,
  DayEventKind
};
use crate::holiday::{
  Region,
  is_holiday
};
use crate::projection::DayBuckets;
use crate::shifts::count_shift_blocks;

pub const DEFAULT_VACATION_QUOTA: i64 =
  28;

/// Headline figures for one year.
#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct AnnualSummary {
  pub year:               i32,
  pub overtime_hours:     f64,
  pub holiday_count:      u32,
  /// Negative when more vacation days
  /// were booked than the quota allows.
  pub vacation_remaining: i64,
  pub shift_blocks:       u32
}

fn day_events_in_year(
  buckets: &DayBuckets,
  year: i32,
  kind: DayEventKind
) -> impl Iterator<Item = &DayEvent> {
  year_bounds(year)
    .into_iter()
    .flat_map(move |(first, last)| {
      buckets.range(first..=last)
    })
    .filter_map(move |(_, bucket)| {
      bucket
        .day_event
        .as_ref()
        .filter(|event| event.kind == kind)
    })
}

pub fn annual_overtime_hours(
  buckets: &DayBuckets,
  year: i32
) -> f64 {
  day_events_in_year(
    buckets,
    year,
    DayEventKind::Extra
  )
  .map(|event| {
    event.hours.unwrap_or_default()
  })
  .sum()
}

/// Explicit `Festivo` days plus every
/// other day of the year that is a holiday
/// in `region`. A day tagged `Festivo` that
/// is also a holiday counts once; a holiday
/// carrying some other event still counts.
pub fn annual_holiday_count(
  buckets: &DayBuckets,
  year: i32,
  region: Region
) -> u32 {
  let explicit = day_events_in_year(
    buckets,
    year,
    DayEventKind::Festivo
  )
  .count() as u32;

  let detected = days_of_year(year)
    .filter(|day| {
      is_holiday(*day, region)
        && !buckets.get(day).is_some_and(
          |bucket| {
            bucket.day_event.as_ref().is_some_and(|event| {
              event.kind
                == DayEventKind::Festivo
            })
          }
        )
    })
    .count() as u32;

  explicit + detected
}

pub fn vacation_quota_remaining(
  buckets: &DayBuckets,
  year: i32,
  annual_quota: i64
) -> i64 {
  let used = day_events_in_year(
    buckets,
    year,
    DayEventKind::Vacaciones
  )
  .count() as i64;
  annual_quota - used
}

pub fn annual_summary(
  buckets: &DayBuckets,
  year: i32,
  region: Region,
  annual_quota: i64
) -> AnnualSummary {
  AnnualSummary {
    year,
    overtime_hours: annual_overtime_hours(
      buckets, year
    ),
    holiday_count: annual_holiday_count(
      buckets, year, region
    ),
    vacation_remaining:
      vacation_quota_remaining(
        buckets,
        year,
        annual_quota
      ),
    shift_blocks: count_shift_blocks(
      buckets, year
    )
  }
}
