//! Spanish public holidays.
//!
//! Three layers apply to a date:
//! * national fixed dates (New Year, Epiphany, Labour Day, ...);
//! * Easter-relative dates: Holy Thursday and Good Friday nationally,
//!   Easter Monday in a handful of communities;
//! * the fixed days of each autonomous community or city.
//!
//! Everything here is pure date arithmetic over [`NaiveDate`]; time of day
//! never takes part.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Datelike,
  Duration,
  NaiveDate
};
use serde::Serialize;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Default,
)]
pub enum Region {
  #[default]
  #[serde(rename = "national")]
  National,
  #[serde(rename = "AN")]
  Andalucia,
  #[serde(rename = "AR")]
  Aragon,
  #[serde(rename = "AS")]
  Asturias,
  #[serde(rename = "IB")]
  Baleares,
  #[serde(rename = "CN")]
  Canarias,
  #[serde(rename = "CB")]
  Cantabria,
  #[serde(rename = "CM")]
  CastillaLaMancha,
  #[serde(rename = "CL")]
  CastillaYLeon,
  #[serde(rename = "CT")]
  Cataluna,
  #[serde(rename = "EX")]
  Extremadura,
  #[serde(rename = "GA")]
  Galicia,
  #[serde(rename = "MD")]
  Madrid,
  #[serde(rename = "MC")]
  Murcia,
  #[serde(rename = "NC")]
  Navarra,
  #[serde(rename = "PV")]
  PaisVasco,
  #[serde(rename = "RI")]
  LaRioja,
  #[serde(rename = "VC")]
  Valencia,
  #[serde(rename = "CE")]
  Ceuta,
  #[serde(rename = "ML")]
  Melilla
}

impl Region {
  pub const ALL: [Region; 20] = [
    Region::National,
    Region::Andalucia,
    Region::Aragon,
    Region::Asturias,
    Region::Baleares,
    Region::Canarias,
    Region::Cantabria,
    Region::CastillaLaMancha,
    Region::CastillaYLeon,
    Region::Cataluna,
    Region::Extremadura,
    Region::Galicia,
    Region::Madrid,
    Region::Murcia,
    Region::Navarra,
    Region::PaisVasco,
    Region::LaRioja,
    Region::Valencia,
    Region::Ceuta,
    Region::Melilla
  ];

  pub fn code(self) -> &'static str {
    match self {
      | Region::National => "national",
      | Region::Andalucia => "AN",
      | Region::Aragon => "AR",
      | Region::Asturias => "AS",
      | Region::Baleares => "IB",
      | Region::Canarias => "CN",
      | Region::Cantabria => "CB",
      | Region::CastillaLaMancha => "CM",
      | Region::CastillaYLeon => "CL",
      | Region::Cataluna => "CT",
      | Region::Extremadura => "EX",
      | Region::Galicia => "GA",
      | Region::Madrid => "MD",
      | Region::Murcia => "MC",
      | Region::Navarra => "NC",
      | Region::PaisVasco => "PV",
      | Region::LaRioja => "RI",
      | Region::Valencia => "VC",
      | Region::Ceuta => "CE",
      | Region::Melilla => "ML"
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      | Region::National => "Nacional",
      | Region::Andalucia => "Andalucía",
      | Region::Aragon => "Aragón",
      | Region::Asturias => "Asturias",
      | Region::Baleares => {
        "Illes Balears"
      }
      | Region::Canarias => "Canarias",
      | Region::Cantabria => "Cantabria",
      | Region::CastillaLaMancha => {
        "Castilla-La Mancha"
      }
      | Region::CastillaYLeon => {
        "Castilla y León"
      }
      | Region::Cataluna => "Catalunya",
      | Region::Extremadura => {
        "Extremadura"
      }
      | Region::Galicia => "Galicia",
      | Region::Madrid => {
        "Comunidad de Madrid"
      }
      | Region::Murcia => {
        "Región de Murcia"
      }
      | Region::Navarra => "Navarra",
      | Region::PaisVasco => {
        "País Vasco"
      }
      | Region::LaRioja => "La Rioja",
      | Region::Valencia => {
        "Comunitat Valenciana"
      }
      | Region::Ceuta => "Ceuta",
      | Region::Melilla => "Melilla"
    }
  }

  /// Fixed `(month, day, name)` entries
  /// owned by this region. Empty for
  /// `National` and for communities that
  /// only add Easter Monday.
  pub fn fixed_holidays(
    self
  ) -> &'static [(u32, u32, &'static str)]
  {
    match self {
      | Region::National
      | Region::Navarra
      | Region::PaisVasco => &[],
      | Region::Andalucia => {
        &[(2, 28, "Día de Andalucía")]
      }
      | Region::Aragon => {
        &[(4, 23, "San Jorge")]
      }
      | Region::Asturias => {
        &[(9, 8, "Día de Asturias")]
      }
      | Region::Baleares => &[(
        3,
        1,
        "Día de las Illes Balears"
      )],
      | Region::Canarias => {
        &[(5, 30, "Día de Canarias")]
      }
      | Region::Cantabria => &[
        (
          7,
          28,
          "Día de las Instituciones"
        ),
        (9, 15, "La Bien Aparecida")
      ],
      | Region::CastillaLaMancha => &[(
        5,
        31,
        "Día de Castilla-La Mancha"
      )],
      | Region::CastillaYLeon => &[(
        4,
        23,
        "Día de Castilla y León"
      )],
      | Region::Cataluna => &[
        (6, 24, "Sant Joan"),
        (
          9,
          11,
          "Diada Nacional de Catalunya"
        ),
        (12, 26, "Sant Esteve")
      ],
      | Region::Extremadura => {
        &[(9, 8, "Día de Extremadura")]
      }
      | Region::Galicia => &[
        (
          5,
          17,
          "Día das Letras Galegas"
        ),
        (
          7,
          25,
          "Día Nacional de Galicia"
        )
      ],
      | Region::Madrid => &[(
        5,
        2,
        "Fiesta de la Comunidad de \
         Madrid"
      )],
      | Region::Murcia => &[(
        6,
        9,
        "Día de la Región de Murcia"
      )],
      | Region::LaRioja => {
        &[(6, 9, "Día de La Rioja")]
      }
      | Region::Valencia => &[
        (3, 19, "San José"),
        (
          10,
          9,
          "Día de la Comunitat \
           Valenciana"
        )
      ],
      | Region::Ceuta => {
        &[(9, 2, "Día de Ceuta")]
      }
      | Region::Melilla => {
        &[(9, 17, "Día de Melilla")]
      }
    }
  }
}

impl fmt::Display for Region {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.code())
  }
}

impl FromStr for Region {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    if trimmed.is_empty()
      || trimmed
        .eq_ignore_ascii_case("national")
    {
      return Ok(Region::National);
    }
    Region::ALL
      .into_iter()
      .find(|region| {
        region
          .code()
          .eq_ignore_ascii_case(trimmed)
      })
      .ok_or_else(|| {
        anyhow!(
          "unknown region code: {s}"
        )
      })
  }
}

/// National fixed-date holidays as
/// `(month, day, name)`.
pub const NATIONAL_FIXED_HOLIDAYS: [(
  u32,
  u32,
  &str
); 9] = [
  (1, 1, "Año Nuevo"),
  (1, 6, "Epifanía del Señor"),
  (5, 1, "Fiesta del Trabajo"),
  (8, 15, "Asunción de la Virgen"),
  (10, 12, "Fiesta Nacional de España"),
  (11, 1, "Todos los Santos"),
  (12, 6, "Día de la Constitución"),
  (12, 8, "Inmaculada Concepción"),
  (12, 25, "Navidad")
];

/// Communities that observe Easter
/// Monday.
pub static EASTER_MONDAY_REGIONS: [Region;
  6] = [
  Region::Cataluna,
  Region::Valencia,
  Region::Baleares,
  Region::Navarra,
  Region::PaisVasco,
  Region::LaRioja
];

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum HolidayScope {
  National,
  Regions(&'static [Region])
}

impl HolidayScope {
  pub fn applies_to(
    self,
    region: Region
  ) -> bool {
    match self {
      | HolidayScope::National => true,
      | HolidayScope::Regions(
        regions
      ) => regions.contains(&region)
    }
  }
}

impl Serialize for HolidayScope {
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer
  {
    match self {
      | HolidayScope::National => {
        serializer
          .serialize_str("national")
      }
      | HolidayScope::Regions(
        regions
      ) => regions.serialize(serializer)
    }
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
  pub date:  NaiveDate,
  pub name:  &'static str,
  pub scope: HolidayScope
}

/// Easter Sunday of `year` in the
/// Gregorian calendar (Meeus/Jones/Butcher
/// anonymous algorithm).
///
/// Only defined for years from 1583 on;
/// earlier years give a meaningless date.
pub fn compute_easter_sunday(
  year: i32
) -> NaiveDate {
  let a = year.rem_euclid(19);
  let b = year.div_euclid(100);
  let c = year.rem_euclid(100);
  let d = b / 4;
  let e = b % 4;
  let f = (b + 8) / 25;
  let g = (b - f + 1) / 3;
  let h =
    (19 * a + b - d - g + 15) % 30;
  let i = c / 4;
  let k = c % 4;
  let l =
    (32 + 2 * e + 2 * i - h - k) % 7;
  let m = (a + 11 * h + 22 * l) / 451;
  let n = h + l - 7 * m + 114;
  let month = (n / 31) as u32;
  let day = (n % 31 + 1) as u32;

  // Only unreachable outside chrono's
  // supported year range.
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(NaiveDate::MIN)
}

fn easter_offset(
  year: i32,
  days: i64
) -> NaiveDate {
  compute_easter_sunday(year)
    + Duration::days(days)
}

pub fn holy_thursday(
  year: i32
) -> NaiveDate {
  easter_offset(year, -3)
}

pub fn good_friday(
  year: i32
) -> NaiveDate {
  easter_offset(year, -2)
}

pub fn easter_monday(
  year: i32
) -> NaiveDate {
  easter_offset(year, 1)
}

/// Holy Thursday, Good Friday and Easter
/// Monday of `year`, with their scope.
pub fn easter_derived_holidays(
  year: i32
) -> Vec<Holiday> {
  vec![
    Holiday {
      date:  holy_thursday(year),
      name:  "Jueves Santo",
      scope: HolidayScope::National
    },
    Holiday {
      date:  good_friday(year),
      name:  "Viernes Santo",
      scope: HolidayScope::National
    },
    Holiday {
      date:  easter_monday(year),
      name:  "Lunes de Pascua",
      scope: HolidayScope::Regions(
        &EASTER_MONDAY_REGIONS
      ),
    },
  ]
}

fn matches_fixed(
  date: NaiveDate,
  table: &[(u32, u32, &str)]
) -> bool {
  table.iter().any(|(month, day, _)| {
    date.month() == *month
      && date.day() == *day
  })
}

pub fn is_national_fixed_holiday(
  date: NaiveDate
) -> bool {
  matches_fixed(
    date,
    &NATIONAL_FIXED_HOLIDAYS
  ) || date == good_friday(date.year())
}

pub fn is_regional_holiday(
  date: NaiveDate,
  region: Region
) -> bool {
  if region == Region::National {
    return false;
  }

  matches_fixed(
    date,
    region.fixed_holidays()
  ) || (EASTER_MONDAY_REGIONS
    .contains(&region)
    && date == easter_monday(date.year()))
}

pub fn is_holiday(
  date: NaiveDate,
  region: Region
) -> bool {
  is_national_fixed_holiday(date)
    || date == holy_thursday(date.year())
    || is_regional_holiday(date, region)
}

/// Every holiday of `year` that applies
/// in `region`, ordered by date. When two
/// rules land on the same day the national
/// one wins.
pub fn holidays_in_year(
  year: i32,
  region: Region
) -> Vec<Holiday> {
  let mut by_date: BTreeMap<
    NaiveDate,
    Holiday
  > = BTreeMap::new();

  for (month, day, name) in
    NATIONAL_FIXED_HOLIDAYS
  {
    if let Some(date) =
      NaiveDate::from_ymd_opt(
        year, month, day
      )
    {
      by_date.entry(date).or_insert(
        Holiday {
          date,
          name,
          scope: HolidayScope::National
        }
      );
    }
  }

  for holiday in
    easter_derived_holidays(year)
  {
    if holiday.scope.applies_to(region)
    {
      by_date
        .entry(holiday.date)
        .or_insert(holiday);
    }
  }

  if region != Region::National {
    for &(month, day, name) in
      region.fixed_holidays()
    {
      if let Some(date) =
        NaiveDate::from_ymd_opt(
          year, month, day
        )
      {
        by_date.entry(date).or_insert(
          Holiday {
            date,
            name,
            scope: HolidayScope::Regions(
              region_slice(region)
            )
          }
        );
      }
    }
  }

  by_date.into_values().collect()
}

pub fn holiday_name(
  date: NaiveDate,
  region: Region
) -> Option<&'static str> {
  if !is_holiday(date, region) {
    return None;
  }
  holidays_in_year(date.year(), region)
    .into_iter()
    .find(|holiday| holiday.date == date)
    .map(|holiday| holiday.name)
}

static REGIONS: [Region; 20] =
  Region::ALL;

fn region_slice(
  region: Region
) -> &'static [Region] {
  let idx = REGIONS
    .iter()
    .position(|r| *r == region)
    .unwrap_or(0);
  &REGIONS[idx..=idx]
}
