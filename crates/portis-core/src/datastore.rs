use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{NaiveDate, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::EventRecord;
use crate::subscription::{Change, ChangeCallback, Listeners, Subscription};

pub const REGION_PREFERENCE: &str = "region";

/// The per-user calendar collection the engine reads from and writes to.
pub trait EventStore {
    /// Must not notify listeners; the engine calls it while holding its
    /// snapshot lock.
    fn load_all(&self) -> anyhow::Result<Vec<EventRecord>>;

    fn find_by_date(&self, date: NaiveDate) -> anyhow::Result<Vec<EventRecord>>;

    /// Stores `record`, assigning an id and `createdAt` when missing, and
    /// returns what was stored.
    fn insert(&self, record: EventRecord) -> anyhow::Result<EventRecord>;

    /// Returns whether a record with that id existed.
    fn delete(&self, record_id: &str) -> anyhow::Result<bool>;

    fn subscribe(&self, on_change: ChangeCallback) -> Subscription;
}

/// Local, file-backed store: one JSON record per line in `events.data`
/// plus a small preference map in `preferences.data`.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub events_path: PathBuf,
    pub preferences_path: PathBuf,
    listeners: Listeners,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let events_path = data_dir.join("events.data");
        let preferences_path = data_dir.join("preferences.data");

        if !events_path.exists() {
            fs::write(&events_path, "")?;
        }
        if !preferences_path.exists() {
            fs::write(&preferences_path, "{}")?;
        }

        info!(
            data_dir = %data_dir.display(),
            events = %events_path.display(),
            preferences = %preferences_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            events_path,
            preferences_path,
            listeners: Listeners::default(),
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_events(&self) -> anyhow::Result<Vec<EventRecord>> {
        let mut records = load_jsonl(&self.events_path).context("failed to load events.data")?;

        // Records written by other clients may lack an id. Give each one a
        // stable id on first read so deletes can target it.
        let mut assigned = 0usize;
        for record in records.iter_mut().filter(|record| record.id.trim().is_empty()) {
            record.id = Uuid::new_v4().to_string();
            assigned += 1;
        }
        if assigned > 0 {
            warn!(assigned, "assigned ids to records without one");
            self.save_events(&records)?;
        }

        Ok(records)
    }

    #[tracing::instrument(skip(self, records))]
    pub fn save_events(&self, records: &[EventRecord]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.events_path, records).context("failed to save events.data")
    }

    /// Replaces the whole collection and tells listeners to resync.
    #[tracing::instrument(skip(self, records), fields(count = records.len()))]
    pub fn replace_all(&self, records: Vec<EventRecord>) -> anyhow::Result<()> {
        self.save_events(&records)?;
        self.listeners.emit(Change::Snapshot(records));
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn get_preference(&self, key: &str) -> anyhow::Result<Option<String>> {
        let prefs = self.load_preferences()?;
        Ok(prefs
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }

    #[tracing::instrument(skip(self))]
    pub fn set_preference(&self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        let mut prefs = self.load_preferences()?;
        match value {
            Some(value) => {
                prefs.insert(key.to_string(), value.to_string());
            }
            None => {
                prefs.remove(key);
            }
        }

        let dir = self.preferences_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, &prefs)?;
        temp.flush()?;
        temp.persist(&self.preferences_path).map_err(|err| {
            anyhow!(
                "failed to persist {}: {}",
                self.preferences_path.display(),
                err
            )
        })?;
        Ok(())
    }

    fn load_preferences(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let raw = fs::read_to_string(&self.preferences_path)
            .with_context(|| format!("failed reading {}", self.preferences_path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.preferences_path.display()))
    }
}

impl EventStore for DataStore {
    fn load_all(&self) -> anyhow::Result<Vec<EventRecord>> {
        self.load_events()
    }

    #[tracing::instrument(skip(self))]
    fn find_by_date(&self, date: NaiveDate) -> anyhow::Result<Vec<EventRecord>> {
        Ok(self
            .load_events()?
            .into_iter()
            .filter(|record| record.parsed_date() == Some(date))
            .collect())
    }

    #[tracing::instrument(skip(self, record), fields(date = ?record.date, kind = ?record.kind))]
    fn insert(&self, mut record: EventRecord) -> anyhow::Result<EventRecord> {
        if record.id.trim().is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        if record.created_at.is_none() {
            record.created_at = Some(Utc::now());
        }

        let mut records = self.load_events()?;
        if records.iter().any(|existing| existing.id == record.id) {
            return Err(anyhow!("record already exists: {}", record.id));
        }
        records.push(record.clone());
        self.save_events(&records)?;

        debug!(id = %record.id, "inserted event record");
        self.listeners.emit(Change::Added(record.clone()));
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    fn delete(&self, record_id: &str) -> anyhow::Result<bool> {
        if record_id.trim().is_empty() {
            return Err(anyhow!("cannot delete a record without an id"));
        }

        let mut records = self.load_events()?;
        let Some(idx) = records.iter().position(|record| record.id == record_id) else {
            debug!("no record to delete");
            return Ok(false);
        };

        records.remove(idx);
        self.save_events(&records)?;

        debug!(remaining = records.len(), "deleted event record");
        self.listeners.emit(Change::Removed(record_id.to_string()));
        Ok(true)
    }

    fn subscribe(&self, on_change: ChangeCallback) -> Subscription {
        self.listeners.subscribe(on_change)
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<EventRecord>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<EventRecord>(trimmed) {
            Ok(record) => out.push(record),
            Err(err) => warn!(
                file = %path.display(),
                line = idx + 1,
                error = %err,
                "skipping unreadable record line"
            ),
        }
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic(path: &Path, records: &[EventRecord]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tempfile::tempdir;

    use super::*;
    use crate::event::DayEventKind;
    use crate::subscription::ChangeNotification;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn insert_assigns_id_and_notifies() {
        let dir = tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");

        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _subscription = store.subscribe(Box::new(move |n: &ChangeNotification| {
            sink.lock().expect("lock").push(n.sequence);
        }));

        let stored = store
            .insert(EventRecord::day_event(
                date(2024, 3, 4),
                DayEventKind::Guardia,
                None,
            ))
            .expect("insert");
        assert!(!stored.id.is_empty());
        assert!(stored.created_at.is_some());

        assert_eq!(
            store.find_by_date(date(2024, 3, 4)).expect("find").len(),
            1
        );
        assert!(store.find_by_date(date(2024, 3, 5)).expect("find").is_empty());

        assert!(store.delete(&stored.id).expect("delete"));
        assert!(!store.delete(&stored.id).expect("delete again"));
        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);
    }

    #[test]
    fn unreadable_lines_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        fs::write(
            &store.events_path,
            "{\"id\":\"a\",\"date\":\"2024-01-02\",\"type\":\"guardia\"}\nnot json\n\n[1,2]\n",
        )
        .expect("write events");

        let records = store.load_all().expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
    }

    #[test]
    fn records_without_id_get_a_stable_one() {
        let dir = tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        fs::write(
            &store.events_path,
            "{\"date\":\"2024-01-05\",\"type\":\"vacaciones\"}\n\
             {\"id\":\"\",\"date\":\"2024-01-09\",\"type\":\"guardia\"}\n",
        )
        .expect("write events");

        let first = store.load_all().expect("load");
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|record| !record.id.is_empty()));
        assert_ne!(first[0].id, first[1].id);

        let again = store.load_all().expect("reload");
        assert_eq!(
            first.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            again.iter().map(|r| r.id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn delete_refuses_empty_id() {
        let dir = tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        store
            .insert(EventRecord::day_event(
                date(2024, 1, 5),
                DayEventKind::Vacaciones,
                None,
            ))
            .expect("insert");

        assert!(store.delete("").is_err());
        assert!(store.delete("  ").is_err());
        assert_eq!(store.load_all().expect("load").len(), 1);
    }

    #[test]
    fn preferences_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");

        assert_eq!(store.get_preference(REGION_PREFERENCE).expect("get"), None);
        store
            .set_preference(REGION_PREFERENCE, Some("VC"))
            .expect("set");
        assert_eq!(
            store.get_preference(REGION_PREFERENCE).expect("get").as_deref(),
            Some("VC")
        );

        let reopened = DataStore::open(dir.path()).expect("reopen");
        assert_eq!(
            reopened.get_preference(REGION_PREFERENCE).expect("get").as_deref(),
            Some("VC")
        );

        reopened
            .set_preference(REGION_PREFERENCE, None)
            .expect("clear");
        assert_eq!(reopened.get_preference(REGION_PREFERENCE).expect("get"), None);
    }
}
