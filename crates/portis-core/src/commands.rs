use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, ScheduleArgs};
use crate::config::Config;
use crate::datastore::{DataStore, REGION_PREFERENCE};
use crate::datetime::{parse_day_expr, to_project_date};
use crate::engine::{CalendarEngine, EngineSettings};
use crate::event::{DayEventKind, MaintenanceDetails};
use crate::holiday::{Region, holiday_name};
use crate::render::Renderer;

/// Where the effective region came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionSource {
    Config,
    Preference,
    Default,
}

/// Region used for holiday checks: `calendar.region` from the rc file, then
/// the stored preference, then national holidays only.
pub fn resolve_region(cfg: &Config, store: &DataStore) -> anyhow::Result<(Region, RegionSource)> {
    if let Some(region) = cfg.region()? {
        return Ok((region, RegionSource::Config));
    }

    match store.get_preference(REGION_PREFERENCE)? {
        Some(raw) => match raw.parse::<Region>() {
            Ok(region) => Ok((region, RegionSource::Preference)),
            Err(err) => {
                warn!(value = %raw, error = %err, "ignoring invalid stored region");
                Ok((Region::National, RegionSource::Default))
            }
        },
        None => Ok((Region::National, RegionSource::Default)),
    }
}

#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch(
    store: DataStore,
    cfg: &Config,
    renderer: &Renderer,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let (region, source) = resolve_region(cfg, &store)?;
    let settings = EngineSettings {
        region,
        vacation_quota: cfg.vacation_quota()?,
    };
    debug!(%region, ?source, quota = settings.vacation_quota, "resolved engine settings");

    let engine = CalendarEngine::attach(store, settings)?;

    match command {
        Some(Command::Record { date, kind, hours }) => {
            cmd_record(&engine, &date, &kind, hours.as_deref(), now)
        }
        Some(Command::Delete { date }) => cmd_delete(&engine, &date, now),
        Some(Command::Day { date }) => cmd_day(&engine, renderer, &date, now),
        Some(Command::Holiday { date }) => cmd_holiday(&engine, renderer, &date, now),
        Some(Command::Holidays { year }) => {
            let year = year.unwrap_or_else(|| current_year(now));
            renderer.print_holidays(region, &engine.holidays(year))
        }
        Some(Command::Summary { year }) => {
            let year = year.unwrap_or_else(|| current_year(now));
            renderer.print_summary(&engine.get_annual_summary(year))
        }
        Some(Command::Month { year, month }) => {
            renderer.print_month(&engine.month_view(year, month)?)
        }
        Some(Command::Schedule(args)) => cmd_schedule(&engine, args, now),
        Some(Command::Unschedule {
            maintenance_id,
            record_id,
        }) => {
            engine.unschedule_maintenance(&maintenance_id, &record_id)?;
            println!("Unscheduled {maintenance_id} ({record_id}).");
            Ok(())
        }
        Some(Command::Region { code }) => cmd_region(
            engine.store(),
            cfg,
            renderer,
            code.as_deref(),
            region,
            source,
        ),
        Some(Command::Config) => cmd_config(cfg, renderer),
        None => renderer.print_summary(&engine.get_annual_summary(current_year(now))),
    }
}

fn current_year(now: DateTime<Utc>) -> i32 {
    to_project_date(now).year()
}

fn parse_date(raw: &str, now: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    parse_day_expr(raw, now).with_context(|| format!("invalid date: {raw}"))
}

/// Accepts `2.5` as well as `2,5`.
pub fn parse_hours(raw: &str) -> anyhow::Result<f64> {
    let normalized = raw.trim().replace(',', ".");
    let hours: f64 = normalized
        .parse()
        .map_err(|_| anyhow!("invalid number of hours: {raw}"))?;
    if !hours.is_finite() || hours < 0.0 {
        return Err(anyhow!("hours must be a non-negative number: {raw}"));
    }
    Ok(hours)
}

fn cmd_record(
    engine: &CalendarEngine<DataStore>,
    date: &str,
    kind: &str,
    hours: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let date = parse_date(date, now)?;
    let kind: DayEventKind = kind.parse()?;
    let hours = hours.map(parse_hours).transpose()?;

    let record = engine.record_event(date, kind, hours)?;
    match hours {
        Some(hours) if kind == DayEventKind::Extra => {
            println!("Recorded {kind} ({hours}h) on {date} [{}].", record.id)
        }
        _ => println!("Recorded {kind} on {date} [{}].", record.id),
    }
    Ok(())
}

fn cmd_delete(
    engine: &CalendarEngine<DataStore>,
    date: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let date = parse_date(date, now)?;
    if engine.delete_event(date)? {
        println!("Deleted the day event on {date}.");
    } else {
        println!("No day event on {date}.");
    }
    Ok(())
}

fn cmd_day(
    engine: &CalendarEngine<DataStore>,
    renderer: &Renderer,
    date: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let date = parse_date(date, now)?;
    let bucket = engine.get_day_bucket(date);
    let name = holiday_name(date, engine.settings().region);
    renderer.print_day(date, &bucket, name)
}

fn cmd_holiday(
    engine: &CalendarEngine<DataStore>,
    renderer: &Renderer,
    date: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let date = parse_date(date, now)?;
    let region = engine.settings().region;
    let name = if engine.is_holiday(date) {
        holiday_name(date, region)
    } else {
        None
    };
    renderer.print_holiday_status(date, region, name)
}

fn cmd_schedule(
    engine: &CalendarEngine<DataStore>,
    args: ScheduleArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let date = parse_date(&args.date, now)?;
    let details = MaintenanceDetails {
        maintenance_id: args.maintenance_id,
        location: args.location,
        scheduled_time: args.scheduled_time,
        notes: args.notes,
    };

    let records = match (args.every, args.count) {
        (Some(every), Some(count)) => {
            engine.schedule_contract_visits(date, every, count, &details)?
        }
        _ => vec![engine.schedule_maintenance(date, &details)?],
    };

    for record in &records {
        println!(
            "Scheduled {} on {} [{}].",
            details.maintenance_id,
            record.date.as_deref().unwrap_or("-"),
            record.id
        );
    }
    Ok(())
}

fn cmd_region(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    code: Option<&str>,
    current: Region,
    source: RegionSource,
) -> anyhow::Result<()> {
    let Some(code) = code else {
        return print_region(renderer, current, source);
    };

    let region: Region = code.parse()?;
    if region == Region::National {
        store.set_preference(REGION_PREFERENCE, None)?;
    } else {
        store.set_preference(REGION_PREFERENCE, Some(region.code()))?;
    }
    info!(%region, "stored region preference");

    if cfg.region()?.is_some() {
        warn!("calendar.region in the rc file still overrides the stored region");
    }
    print_region(renderer, region, RegionSource::Preference)
}

fn print_region(renderer: &Renderer, region: Region, source: RegionSource) -> anyhow::Result<()> {
    if renderer.is_json() {
        #[derive(Serialize)]
        struct RegionView {
            code: &'static str,
            name: &'static str,
            source: RegionSource,
        }
        return renderer.print_json(&RegionView {
            code: region.code(),
            name: region.name(),
            source,
        });
    }

    println!("{} ({})", region.name(), region.code());
    Ok(())
}

fn cmd_config(cfg: &Config, renderer: &Renderer) -> anyhow::Result<()> {
    let sorted: BTreeMap<&String, &String> = cfg.iter().collect();
    if renderer.is_json() {
        return renderer.print_json(&sorted);
    }

    for (key, value) in sorted {
        println!("{key}={value}");
    }
    for path in &cfg.loaded_files {
        debug!(file = %path.display(), "config file");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hours_accept_decimal_comma() {
        assert_eq!(parse_hours("2,5").expect("hours"), 2.5);
        assert_eq!(parse_hours(" 3 ").expect("hours"), 3.0);
        assert!(parse_hours("-1").is_err());
        assert!(parse_hours("NaN").is_err());
        assert!(parse_hours("lots").is_err());
    }

    #[test]
    fn stored_region_is_used_without_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        let cfg = Config::from_rc_str("").expect("config");

        assert_eq!(
            resolve_region(&cfg, &store).expect("region"),
            (Region::National, RegionSource::Default)
        );

        store
            .set_preference(REGION_PREFERENCE, Some("CT"))
            .expect("store preference");
        assert_eq!(
            resolve_region(&cfg, &store).expect("region"),
            (Region::Cataluna, RegionSource::Preference)
        );

        let cfg = Config::from_rc_str("calendar.region=MD").expect("config");
        assert_eq!(
            resolve_region(&cfg, &store).expect("region"),
            (Region::Madrid, RegionSource::Config)
        );
    }

    #[test]
    fn invalid_stored_region_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(dir.path()).expect("open");
        store
            .set_preference(REGION_PREFERENCE, Some("Atlantis"))
            .expect("store preference");
        let cfg = Config::from_rc_str("").expect("config");

        assert_eq!(
            resolve_region(&cfg, &store).expect("region"),
            (Region::National, RegionSource::Default)
        );
    }
}
