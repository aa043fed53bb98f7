use std::sync::{
  Arc,
  Mutex,
  MutexGuard,
  PoisonError
};

use anyhow::{
  Context,
  anyhow
};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{
  debug,
  info,
  instrument,
  warn
};

use crate::datastore::EventStore;
use crate::datetime::{
  add_months_clamped,
  days_of_month
};
use crate::event::{
  DayEventKind,
  EventRecord,
  MaintenanceDetails
};
use crate::holiday::{
  Holiday,
  Region,
  holiday_name,
  holidays_in_year,
  is_holiday
};
use crate::projection::{
  DayBucket,
  DayBuckets,
  project
};
use crate::subscription::{
  Change,
  ChangeNotification,
  Subscription
};
use crate::summary::{
  AnnualSummary,
  DEFAULT_VACATION_QUOTA,
  annual_summary
};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
  pub region:         Region,
  pub vacation_quota: i64
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      region:         Region::National,
      vacation_quota:
        DEFAULT_VACATION_QUOTA
    }
  }
}

/// One row of a month grid.
#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
  pub date:         NaiveDate,
  pub bucket:       DayBucket,
  pub holiday:      bool,
  pub holiday_name: Option<&'static str>
}

/// Records plus the projection built from
/// them. Swapped as a whole, so readers
/// never see a half-applied change.
#[derive(Debug, Default)]
struct Snapshot {
  records:  Vec<EventRecord>,
  buckets:  DayBuckets,
  sequence: u64
}

impl Snapshot {
  fn apply(
    &mut self,
    notification: ChangeNotification
  ) -> bool {
    if notification.sequence
      <= self.sequence
    {
      debug!(
        sequence = notification.sequence,
        current = self.sequence,
        "discarding stale change notification"
      );
      return false;
    }

    let records = match notification
      .change
    {
      | Change::Snapshot(all) => all,
      | Change::Added(record)
      | Change::Modified(record) => {
        let mut records =
          self.records.clone();
        upsert(&mut records, record);
        records
      }
      | Change::Removed(id) => self
        .records
        .iter()
        .filter(|record| record.id != id)
        .cloned()
        .collect()
    };

    let buckets = project(&records);
    *self = Snapshot {
      records,
      buckets,
      sequence: notification.sequence
    };
    true
  }

  fn replace(
    &mut self,
    records: Vec<EventRecord>
  ) {
    self.buckets = project(&records);
    self.records = records;
  }
}

fn upsert(
  records: &mut Vec<EventRecord>,
  record: EventRecord
) {
  match records
    .iter_mut()
    .find(|existing| existing.id == record.id)
  {
    | Some(existing) => *existing = record,
    | None => records.push(record)
  }
}

/// Calendar engine over an injected
/// [`EventStore`].
///
/// Queries are answered from the current
/// snapshot. Mutations go to the store;
/// the snapshot catches up through the
/// store's change notifications.
pub struct CalendarEngine<S: EventStore> {
  store:         S,
  settings:      EngineSettings,
  snapshot:      Arc<Mutex<Snapshot>>,
  _subscription: Subscription
}

impl<S: EventStore> CalendarEngine<S> {
  /// Subscribes to `store` and loads its
  /// current contents.
  #[instrument(skip(store))]
  pub fn attach(
    store: S,
    settings: EngineSettings
  ) -> anyhow::Result<Self> {
    let snapshot = Arc::new(Mutex::new(
      Snapshot::default()
    ));

    // Subscribe before loading so nothing
    // written in between is missed.
    let shared = Arc::clone(&snapshot);
    let subscription = store.subscribe(
      Box::new(
        move |notification: &ChangeNotification| {
          shared
            .lock()
            .unwrap_or_else(
              PoisonError::into_inner
            )
            .apply(notification.clone());
        }
      )
    );

    let engine = Self {
      store,
      settings,
      snapshot,
      _subscription: subscription
    };
    let loaded = engine.reload()?;
    info!(
      records = loaded,
      region = %engine.settings.region,
      "calendar engine attached"
    );
    Ok(engine)
  }

  /// Reloads every record from the store.
  ///
  /// The snapshot stays locked from the
  /// read until the swap, so a
  /// notification delivered meanwhile
  /// waits and is applied on top of the
  /// loaded records instead of being
  /// overwritten by them.
  pub fn reload(
    &self
  ) -> anyhow::Result<usize> {
    let mut snapshot = self.lock();
    let records =
      self.store.load_all().context(
        "failed to load calendar \
         records"
      )?;
    let count = records.len();
    snapshot.replace(records);
    Ok(count)
  }

  pub fn settings(
    &self
  ) -> &EngineSettings {
    &self.settings
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  fn lock(
    &self
  ) -> MutexGuard<'_, Snapshot> {
    self
      .snapshot
      .lock()
      .unwrap_or_else(
        PoisonError::into_inner
      )
  }

  /// Rebuilds everything from `records`.
  #[instrument(skip_all, fields(records = records.len()))]
  pub fn replace_snapshot(
    &self,
    records: Vec<EventRecord>
  ) {
    self.lock().replace(records);
  }

  /// Applies one change notification.
  /// Returns `false` when it was older
  /// than what the engine already holds.
  pub fn apply_change(
    &self,
    notification: ChangeNotification
  ) -> bool {
    self.lock().apply(notification)
  }

  pub fn buckets(&self) -> DayBuckets {
    self.lock().buckets.clone()
  }

  pub fn get_day_bucket(
    &self,
    date: NaiveDate
  ) -> DayBucket {
    self
      .lock()
      .buckets
      .get(&date)
      .cloned()
      .unwrap_or_default()
  }

  pub fn is_holiday(
    &self,
    date: NaiveDate
  ) -> bool {
    is_holiday(date, self.settings.region)
  }

  pub fn holidays(
    &self,
    year: i32
  ) -> Vec<Holiday> {
    holidays_in_year(
      year,
      self.settings.region
    )
  }

  pub fn get_annual_summary(
    &self,
    year: i32
  ) -> AnnualSummary {
    let snapshot = self.lock();
    annual_summary(
      &snapshot.buckets,
      year,
      self.settings.region,
      self.settings.vacation_quota
    )
  }

  pub fn month_view(
    &self,
    year: i32,
    month: u32
  ) -> anyhow::Result<Vec<CalendarDay>>
  {
    let days =
      days_of_month(year, month)?;
    let snapshot = self.lock();
    let region = self.settings.region;
    Ok(
      days
        .into_iter()
        .map(|date| {
          CalendarDay {
            date,
            bucket: snapshot
              .buckets
              .get(&date)
              .cloned()
              .unwrap_or_default(),
            holiday: is_holiday(
              date, region
            ),
            holiday_name: holiday_name(
              date, region
            )
          }
        })
        .collect()
    )
  }

  /// Makes `kind` the day event of `date`.
  ///
  /// Existing day events on that date are
  /// deleted first. The two steps are not
  /// atomic; a concurrent writer can still
  /// slip a record in between.
  #[instrument(skip(self))]
  pub fn record_event(
    &self,
    date: NaiveDate,
    kind: DayEventKind,
    hours: Option<f64>
  ) -> anyhow::Result<EventRecord> {
    let hours = match (kind, hours) {
      | (DayEventKind::Extra, Some(h))
        if h.is_finite() && h >= 0.0 =>
      {
        Some(h)
      }
      | (DayEventKind::Extra, Some(h)) => {
        return Err(anyhow!(
          "overtime hours must be a \
           non-negative number, got {h}"
        ));
      }
      | (DayEventKind::Extra, None) => {
        return Err(anyhow!(
          "overtime entries need a \
           number of hours"
        ));
      }
      | (_, Some(h)) => {
        debug!(
          hours = h,
          "ignoring hours for non-overtime event"
        );
        None
      }
      | (_, None) => None
    };

    let removed =
      self.remove_day_events(date)?;
    let record = self.store.insert(
      EventRecord::day_event(
        date, kind, hours
      )
    )?;

    info!(
      id = %record.id,
      replaced = removed,
      "recorded day event"
    );
    Ok(record)
  }

  /// Deletes the day event of `date`.
  /// Maintenance entries stay.
  #[instrument(skip(self))]
  pub fn delete_event(
    &self,
    date: NaiveDate
  ) -> anyhow::Result<bool> {
    let removed =
      self.remove_day_events(date)?;
    if removed == 0 {
      debug!("no day event to delete");
    } else {
      info!(
        removed,
        "deleted day event"
      );
    }
    Ok(removed > 0)
  }

  fn remove_day_events(
    &self,
    date: NaiveDate
  ) -> anyhow::Result<usize> {
    let existing = self
      .store
      .find_by_date(date)
      .with_context(|| {
        format!(
          "failed to look up events on \
           {date}"
        )
      })?;

    let mut removed = 0;
    for record in existing
      .iter()
      .filter(|record| {
        record.is_day_event()
      })
    {
      if self.store.delete(&record.id)? {
        removed += 1;
      }
    }
    if removed > 1 {
      warn!(
        %date,
        removed,
        "date held more than one day event"
      );
    }
    Ok(removed)
  }

  #[instrument(skip(self, details), fields(maintenance = %details.maintenance_id))]
  pub fn schedule_maintenance(
    &self,
    date: NaiveDate,
    details: &MaintenanceDetails
  ) -> anyhow::Result<EventRecord> {
    if details
      .maintenance_id
      .trim()
      .is_empty()
    {
      return Err(anyhow!(
        "maintenance id cannot be empty"
      ));
    }

    let record = self.store.insert(
      EventRecord::maintenance(
        date, details
      )
    )?;
    info!(
      id = %record.id,
      %date,
      "scheduled maintenance"
    );
    Ok(record)
  }

  /// Schedules `count` visits of a
  /// maintenance contract, one every
  /// `every_months` months from `start`.
  #[instrument(skip(self, details), fields(maintenance = %details.maintenance_id))]
  pub fn schedule_contract_visits(
    &self,
    start: NaiveDate,
    every_months: u32,
    count: u32,
    details: &MaintenanceDetails
  ) -> anyhow::Result<Vec<EventRecord>>
  {
    if every_months == 0 {
      return Err(anyhow!(
        "visit interval must be at \
         least one month"
      ));
    }
    if count == 0 {
      return Err(anyhow!(
        "visit count must be at least \
         one"
      ));
    }

    let mut scheduled =
      Vec::with_capacity(count as usize);
    for visit in 0..count {
      let offset = every_months
        .checked_mul(visit)
        .ok_or_else(|| {
          anyhow!(
            "visit schedule overflows"
          )
        })?;
      // Always offset from `start` so a
      // clamped month end does not drift.
      let date =
        add_months_clamped(start, offset)?;
      scheduled.push(
        self.schedule_maintenance(
          date, details
        )?
      );
    }
    Ok(scheduled)
  }

  /// Removes the calendar entry
  /// `event_record_id`, which must be a
  /// maintenance entry for
  /// `maintenance_id`.
  #[instrument(skip(self))]
  pub fn unschedule_maintenance(
    &self,
    maintenance_id: &str,
    event_record_id: &str
  ) -> anyhow::Result<()> {
    let record = self
      .store
      .load_all()?
      .into_iter()
      .find(|record| {
        record.id == event_record_id
      })
      .ok_or_else(|| {
        anyhow!(
          "calendar entry not found: \
           {event_record_id}"
        )
      })?;

    if !record.is_maintenance() {
      return Err(anyhow!(
        "calendar entry \
         {event_record_id} is not a \
         scheduled maintenance"
      ));
    }
    if record.maintenance_id.as_deref()
      != Some(maintenance_id)
    {
      return Err(anyhow!(
        "calendar entry \
         {event_record_id} belongs to \
         maintenance {}, not \
         {maintenance_id}",
        record
          .maintenance_id
          .as_deref()
          .unwrap_or("-")
      ));
    }

    if !self.store.delete(&record.id)? {
      return Err(anyhow!(
        "calendar entry vanished before \
         it could be removed: \
         {event_record_id}"
      ));
    }
    info!("unscheduled maintenance");
    Ok(())
  }
}
