use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  Months,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "portis-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "PORTIS_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "PORTIS_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "Europe/Madrid";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

/// Calendar day of `now` in the project
/// timezone.
#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Parses a stored `YYYY-MM-DD` date.
///
/// A trailing time part (`2024-03-29T10:00`
/// or `2024-03-29 10:00`) is ignored so
/// that only the calendar day takes part
/// in comparisons.
pub fn parse_iso_date(
  raw: &str
) -> Option<NaiveDate> {
  let trimmed = raw.trim();
  let day_part = trimmed
    .split(['T', ' '])
    .next()
    .unwrap_or(trimmed);
  if day_part.len() != 10 {
    return None;
  }
  NaiveDate::parse_from_str(
    day_part, "%Y-%m-%d"
  )
  .ok()
}

#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_day_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = to_project_date(now);

  match lower.as_str() {
    | "today" | "hoy" => {
      return Ok(today);
    }
    | "tomorrow" | "manana"
    | "mañana" => {
      return Ok(today + Duration::days(1));
    }
    | "yesterday" | "ayer" => {
      return Ok(today - Duration::days(1));
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, target
    ));
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => Duration::days(num),
      | "w" => Duration::weeks(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };

    let shifted = if sign == "-" {
      today.checked_sub_signed(duration)
    } else {
      today.checked_add_signed(duration)
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative date out of range: \
         {input}"
      )
    });
  }

  if let Some(date) =
    parse_iso_date(token)
  {
    return Ok(date);
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, weekday \
     names (e.g. monday), +Nd/-Nd, \
     +Nw/-Nw, YYYY-MM-DD"
  })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" | "lunes" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "martes" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed"
    | "miercoles" | "miércoles" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "jueves" => {
      Some(Weekday::Thu)
    }
    | "friday" | "fri" | "viernes" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" | "sabado"
    | "sábado" => Some(Weekday::Sat),
    | "sunday" | "sun" | "domingo" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

/// First and last day of `year`, or
/// `None` outside chrono's range.
pub fn year_bounds(
  year: i32
) -> Option<(NaiveDate, NaiveDate)> {
  let first =
    NaiveDate::from_ymd_opt(year, 1, 1)?;
  let last =
    NaiveDate::from_ymd_opt(year, 12, 31)?;
  Some((first, last))
}

/// Every day of `year` in order.
pub fn days_of_year(
  year: i32
) -> impl Iterator<Item = NaiveDate> {
  year_bounds(year)
    .into_iter()
    .flat_map(|(first, last)| {
      first
        .iter_days()
        .take_while(move |day| {
          *day <= last
        })
    })
}

pub fn days_of_month(
  year: i32,
  month: u32
) -> anyhow::Result<Vec<NaiveDate>> {
  let first =
    NaiveDate::from_ymd_opt(
      year, month, 1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month: {year}-{month}"
      )
    })?;
  Ok(
    first
      .iter_days()
      .take_while(|day| {
        day.month() == month
      })
      .collect()
  )
}

/// Adds whole months to `date`. A day
/// that does not exist in the target
/// month is clamped to that month's last
/// day (Jan 31 + 1 month = Feb 28/29).
pub fn add_months_clamped(
  date: NaiveDate,
  months: u32
) -> anyhow::Result<NaiveDate> {
  date
    .checked_add_months(Months::new(
      months
    ))
    .ok_or_else(|| {
      anyhow!(
        "date out of range: {date} + \
         {months} months"
      )
    })
}
