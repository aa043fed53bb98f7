use chrono::NaiveDate;
use serde::Serialize;

use crate::datetime::year_bounds;
use crate::event::DayEventKind;
use crate::projection::DayBuckets;

/// Largest gap, in days, between two guard
/// days of the same block. A rotation of
/// up to four days with a gap in between
/// still counts once.
pub const SHIFT_GAP_DAYS: i64 = 3;

#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ShiftBlock {
  pub start: NaiveDate,
  pub end:   NaiveDate,
  /// Guard days inside the block.
  pub days:  u32
}

/// Guard-duty dates of `year`, ascending.
pub fn guard_dates(
  buckets: &DayBuckets,
  year: i32
) -> Vec<NaiveDate> {
  let Some((first, last)) =
    year_bounds(year)
  else {
    return Vec::new();
  };

  buckets
    .range(first..=last)
    .filter(|(_, bucket)| {
      bucket.day_event.as_ref().is_some_and(
        |event| {
          event.kind
            == DayEventKind::Guardia
        }
      )
    })
    .map(|(date, _)| *date)
    .collect()
}

/// Greedy single pass over the sorted
/// guard dates: a date more than
/// [`SHIFT_GAP_DAYS`] after the previous
/// one opens a new block.
pub fn shift_blocks(
  buckets: &DayBuckets,
  year: i32
) -> Vec<ShiftBlock> {
  let mut blocks: Vec<ShiftBlock> =
    Vec::new();

  for date in guard_dates(buckets, year)
  {
    let joins_previous =
      blocks.last().is_some_and(|block| {
        (date - block.end)
          .num_days()
          .abs()
          <= SHIFT_GAP_DAYS
      });

    if joins_previous
      && let Some(block) =
        blocks.last_mut()
    {
      block.end = date;
      block.days += 1;
    } else {
      blocks.push(ShiftBlock {
        start: date,
        end:   date,
        days:  1
      });
    }
  }

  blocks
}

pub fn count_shift_blocks(
  buckets: &DayBuckets,
  year: i32
) -> u32 {
  shift_blocks(buckets, year).len()
    as u32
}
