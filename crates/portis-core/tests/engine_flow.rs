use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDate;
use portis_core::datastore::{DataStore, EventStore};
use portis_core::engine::{CalendarEngine, EngineSettings};
use portis_core::event::{DayEventKind, EventRecord, MaintenanceDetails};
use portis_core::holiday::Region;
use portis_core::subscription::{
    Change, ChangeCallback, ChangeNotification, Listeners, Subscription,
};
use tempfile::{TempDir, tempdir};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn engine_in(dir: &TempDir, region: Region) -> CalendarEngine<DataStore> {
    let store = DataStore::open(dir.path()).expect("open datastore");
    CalendarEngine::attach(
        store,
        EngineSettings {
            region,
            vacation_quota: 28,
        },
    )
    .expect("attach engine")
}

fn ticket(id: &str) -> MaintenanceDetails {
    MaintenanceDetails {
        maintenance_id: id.to_string(),
        location: Some("Calle Mayor 3".to_string()),
        scheduled_time: Some("09:30".to_string()),
        notes: None,
    }
}

#[test]
fn recording_replaces_the_previous_day_event() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);
    let day = date(2024, 3, 4);

    engine
        .record_event(day, DayEventKind::Guardia, None)
        .expect("record guard");
    engine
        .record_event(day, DayEventKind::Extra, Some(2.5))
        .expect("record overtime");

    let stored = engine.store().find_by_date(day).expect("find");
    assert_eq!(stored.len(), 1);

    let bucket = engine.get_day_bucket(day);
    let event = bucket.day_event.expect("day event");
    assert_eq!(event.kind, DayEventKind::Extra);
    assert_eq!(event.hours, Some(2.5));
    assert_eq!(event.record_id, stored[0].id);
}

#[test]
fn repeated_records_leave_one_event() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);
    let day = date(2024, 5, 20);

    for kind in [
        DayEventKind::Vacaciones,
        DayEventKind::Guardia,
        DayEventKind::Festivo,
        DayEventKind::Vacaciones,
    ] {
        engine.record_event(day, kind, None).expect("record");
    }

    assert_eq!(engine.store().load_all().expect("load").len(), 1);
    assert_eq!(
        engine.get_day_bucket(day).day_event.map(|event| event.kind),
        Some(DayEventKind::Vacaciones)
    );
}

#[test]
fn overtime_needs_hours_and_other_kinds_drop_them() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);

    assert!(
        engine
            .record_event(date(2024, 2, 1), DayEventKind::Extra, None)
            .is_err()
    );
    assert!(
        engine
            .record_event(date(2024, 2, 1), DayEventKind::Extra, Some(-1.0))
            .is_err()
    );
    assert!(engine.store().load_all().expect("load").is_empty());

    let record = engine
        .record_event(date(2024, 2, 2), DayEventKind::Guardia, Some(8.0))
        .expect("record guard");
    assert_eq!(record.hours, None);
}

#[test]
fn delete_keeps_maintenance_entries() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);
    let day = date(2024, 6, 12);

    engine
        .record_event(day, DayEventKind::Guardia, None)
        .expect("record");
    engine
        .schedule_maintenance(day, &ticket("MNT-1"))
        .expect("schedule");

    assert!(engine.delete_event(day).expect("delete"));
    assert!(!engine.delete_event(day).expect("delete again"));

    let bucket = engine.get_day_bucket(day);
    assert!(bucket.day_event.is_none());
    assert_eq!(bucket.maintenance.len(), 1);
    assert_eq!(bucket.maintenance[0].maintenance_id, "MNT-1");
    assert_eq!(bucket.maintenance[0].scheduled_time.as_deref(), Some("09:30"));
}

#[test]
fn contract_visits_clamp_to_month_end() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);

    let visits = engine
        .schedule_contract_visits(date(2024, 1, 31), 1, 3, &ticket("CTR-7"))
        .expect("schedule visits");

    let dates: Vec<_> = visits
        .iter()
        .map(|record| record.date.clone().unwrap_or_default())
        .collect();
    assert_eq!(dates, vec!["2024-01-31", "2024-02-29", "2024-03-31"]);
    assert_eq!(engine.get_day_bucket(date(2024, 2, 29)).maintenance.len(), 1);

    assert!(
        engine
            .schedule_contract_visits(date(2024, 1, 31), 0, 3, &ticket("CTR-7"))
            .is_err()
    );
    assert!(
        engine
            .schedule_contract_visits(date(2024, 1, 31), 1, 0, &ticket("CTR-7"))
            .is_err()
    );
}

#[test]
fn unschedule_checks_the_entry() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);
    let day = date(2024, 9, 9);

    let visit = engine
        .schedule_maintenance(day, &ticket("MNT-2"))
        .expect("schedule");
    let guard = engine
        .record_event(day, DayEventKind::Guardia, None)
        .expect("record");

    assert!(engine.unschedule_maintenance("MNT-3", &visit.id).is_err());
    assert!(engine.unschedule_maintenance("MNT-2", &guard.id).is_err());
    assert!(engine.unschedule_maintenance("MNT-2", "missing").is_err());
    assert!(
        engine
            .schedule_maintenance(day, &ticket("  "))
            .is_err()
    );

    engine
        .unschedule_maintenance("MNT-2", &visit.id)
        .expect("unschedule");
    let bucket = engine.get_day_bucket(day);
    assert!(bucket.maintenance.is_empty());
    assert!(bucket.day_event.is_some());
}

#[test]
fn annual_summary_through_the_engine() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::Cataluna);

    for (day, kind, hours) in [
        (date(2024, 1, 1), DayEventKind::Guardia, None),
        (date(2024, 1, 2), DayEventKind::Guardia, None),
        (date(2024, 1, 10), DayEventKind::Guardia, None),
        (date(2024, 2, 5), DayEventKind::Extra, Some(2.5)),
        (date(2024, 2, 6), DayEventKind::Extra, Some(1.5)),
        (date(2024, 8, 5), DayEventKind::Vacaciones, None),
        (date(2024, 8, 6), DayEventKind::Vacaciones, None),
        (date(2024, 8, 7), DayEventKind::Vacaciones, None),
        (date(2024, 6, 13), DayEventKind::Festivo, None),
        (date(2025, 2, 5), DayEventKind::Extra, Some(9.0)),
    ] {
        engine.record_event(day, kind, hours).expect("record");
    }

    let summary = engine.get_annual_summary(2024);
    assert_eq!(summary.year, 2024);
    assert_eq!(summary.overtime_hours, 4.0);
    assert_eq!(summary.vacation_remaining, 25);
    assert_eq!(summary.shift_blocks, 2);
    assert_eq!(summary.holiday_count, 16);

    assert_eq!(engine.get_annual_summary(2025).overtime_hours, 9.0);
}

#[test]
fn empty_store_gives_zero_summary() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);

    let summary = engine.get_annual_summary(2030);
    assert_eq!(summary.overtime_hours, 0.0);
    assert_eq!(summary.vacation_remaining, 28);
    assert_eq!(summary.shift_blocks, 0);
    assert!(engine.buckets().is_empty());
    assert!(engine.get_day_bucket(date(2030, 1, 1)).is_empty());
}

#[test]
fn holidays_follow_the_region() {
    let temp = tempdir().expect("tempdir");
    let national = engine_in(&temp, Region::National);
    let catalan = CalendarEngine::attach(
        DataStore::open(temp.path()).expect("open"),
        EngineSettings {
            region: Region::Cataluna,
            vacation_quota: 28,
        },
    )
    .expect("attach");

    // Easter Monday 2024
    assert!(!national.is_holiday(date(2024, 4, 1)));
    assert!(catalan.is_holiday(date(2024, 4, 1)));
    assert!(national.is_holiday(date(2024, 3, 29)));
    assert_eq!(national.holidays(2024).len(), 11);

    let february = national.month_view(2024, 2).expect("month view");
    assert_eq!(february.len(), 29);
    assert!(national.month_view(2024, 13).is_err());

    let january = catalan.month_view(2024, 1).expect("month view");
    assert!(january[0].holiday);
    assert!(january[5].holiday);
    assert!(!january[1].holiday);
}

#[test]
fn writes_from_another_client_reach_the_engine() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);

    engine
        .store()
        .insert(EventRecord::day_event(
            date(2024, 10, 1),
            DayEventKind::Vacaciones,
            None,
        ))
        .expect("external insert");
    assert_eq!(
        engine
            .get_day_bucket(date(2024, 10, 1))
            .day_event
            .map(|event| event.kind),
        Some(DayEventKind::Vacaciones)
    );

    engine
        .store()
        .replace_all(vec![EventRecord::day_event(
            date(2024, 11, 1),
            DayEventKind::Guardia,
            None,
        )])
        .expect("replace all");
    assert!(engine.get_day_bucket(date(2024, 10, 1)).is_empty());
    assert!(engine.get_day_bucket(date(2024, 11, 1)).day_event.is_some());
}

#[test]
fn stale_notifications_are_discarded() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);

    engine
        .record_event(date(2024, 4, 15), DayEventKind::Guardia, None)
        .expect("record");

    let stale = ChangeNotification {
        sequence: 1,
        change: Change::Snapshot(Vec::new()),
    };
    assert!(!engine.apply_change(stale));
    assert!(engine.get_day_bucket(date(2024, 4, 15)).day_event.is_some());

    let fresh = ChangeNotification {
        sequence: 100,
        change: Change::Snapshot(Vec::new()),
    };
    assert!(engine.apply_change(fresh));
    assert!(engine.buckets().is_empty());
}

#[test]
fn malformed_records_are_skipped() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open");
    std::fs::write(
        &store.events_path,
        [
            r#"{"id":"ok","date":"2024-07-01","type":"extra","hours":"3,5"}"#,
            r#"{"id":"no-date","type":"guardia"}"#,
            r#"{"id":"bad-date","date":"2024-02-30","type":"guardia"}"#,
            r#"{"id":"odd-type","date":"2024-07-02","type":"siesta"}"#,
            r#"{"id":"bad-hours","date":"2024-07-03","type":"extra","hours":"lots"}"#,
            r#"{"id":"no-ticket","date":"2024-07-04","type":"mantenimiento_programado"}"#,
        ]
        .join("\n"),
    )
    .expect("write events");

    let engine = CalendarEngine::attach(store, EngineSettings::default()).expect("attach");
    let buckets = engine.buckets();
    assert_eq!(buckets.len(), 1);
    assert_eq!(
        buckets
            .get(&date(2024, 7, 1))
            .and_then(|bucket| bucket.day_event.as_ref())
            .and_then(|event| event.hours),
        Some(3.5)
    );
    assert_eq!(engine.get_annual_summary(2024).overtime_hours, 3.5);
}

#[test]
fn records_without_id_are_deleted_by_date() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open");
    std::fs::write(
        &store.events_path,
        [
            r#"{"date":"2024-01-05","type":"vacaciones"}"#,
            r#"{"date":"2024-01-09","type":"guardia"}"#,
        ]
        .join("\n"),
    )
    .expect("write events");

    let engine = CalendarEngine::attach(store, EngineSettings::default()).expect("attach");
    assert!(engine.delete_event(date(2024, 1, 9)).expect("delete"));

    let left = engine.store().load_all().expect("load");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].date.as_deref(), Some("2024-01-05"));
    assert_eq!(
        engine
            .get_day_bucket(date(2024, 1, 5))
            .day_event
            .map(|event| event.kind),
        Some(DayEventKind::Vacaciones)
    );
    assert!(engine.get_day_bucket(date(2024, 1, 9)).is_empty());
}

#[test]
fn modified_record_updates_its_day() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_in(&temp, Region::National);
    let day = date(2024, 3, 12);

    let mut record = engine
        .record_event(day, DayEventKind::Guardia, None)
        .expect("record");
    record.kind = Some(DayEventKind::Vacaciones.as_str().to_string());

    assert!(engine.apply_change(ChangeNotification {
        sequence: 10,
        change: Change::Modified(record.clone()),
    }));

    let event = engine.get_day_bucket(day).day_event.expect("day event");
    assert_eq!(event.kind, DayEventKind::Vacaciones);
    assert_eq!(event.record_id, record.id);
    assert_eq!(engine.buckets().len(), 1);
}

/// In-memory store whose first `load_all` has another client delete a
/// record right after the read, from another thread.
#[derive(Default)]
struct RacingStore {
    records: Mutex<Vec<EventRecord>>,
    listeners: Listeners,
    delete_after_load: Mutex<Option<String>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl EventStore for RacingStore {
    fn load_all(&self) -> anyhow::Result<Vec<EventRecord>> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let loaded = records.clone();

        let pending = self
            .delete_after_load
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = pending {
            records.retain(|record| record.id != id);
            let listeners = self.listeners.clone();
            let (delivered_tx, delivered_rx) = mpsc::channel();
            let handle = thread::spawn(move || {
                listeners.emit(Change::Removed(id));
                let _ = delivered_tx.send(());
            });
            // Gives the delivery a chance to land before the caller
            // installs what was read.
            let _ = delivered_rx.recv_timeout(Duration::from_millis(200));
            *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        Ok(loaded)
    }

    fn find_by_date(&self, date: NaiveDate) -> anyhow::Result<Vec<EventRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|record| record.parsed_date() == Some(date))
            .cloned()
            .collect())
    }

    fn insert(&self, record: EventRecord) -> anyhow::Result<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        self.listeners.emit(Change::Added(record.clone()));
        Ok(record)
    }

    fn delete(&self, record_id: &str) -> anyhow::Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|record| record.id != record_id);
        let removed = records.len() != before;
        drop(records);
        if removed {
            self.listeners.emit(Change::Removed(record_id.to_string()));
        }
        Ok(removed)
    }

    fn subscribe(&self, on_change: ChangeCallback) -> Subscription {
        self.listeners.subscribe(on_change)
    }
}

#[test]
fn delete_during_attach_is_not_lost() {
    let day = date(2024, 5, 6);
    let mut record = EventRecord::day_event(day, DayEventKind::Guardia, None);
    record.id = "guard-1".to_string();

    let store = RacingStore::default();
    store
        .records
        .lock()
        .expect("records")
        .push(record);
    *store.delete_after_load.lock().expect("pending") = Some("guard-1".to_string());

    let engine = CalendarEngine::attach(store, EngineSettings::default()).expect("attach");
    let writer = engine
        .store()
        .writer
        .lock()
        .expect("writer")
        .take()
        .expect("writer thread");
    writer.join().expect("join writer");

    assert!(engine.get_day_bucket(day).is_empty());
    assert!(engine.store().load_all().expect("load").is_empty());
}
