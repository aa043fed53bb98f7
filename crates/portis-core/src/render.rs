use std::io::{self, IsTerminal, Write};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::engine::CalendarDay;
use crate::event::{DayEvent, DayEventKind};
use crate::holiday::{Holiday, HolidayScope, Region};
use crate::projection::DayBucket;
use crate::summary::AnnualSummary;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    json: bool,
}

impl Renderer {
    pub fn new(cfg: &Config, json: bool) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color").unwrap_or(true);
        Ok(Self { color, json })
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, bucket))]
    pub fn print_day(
        &self,
        date: NaiveDate,
        bucket: &DayBucket,
        holiday: Option<&str>,
    ) -> anyhow::Result<()> {
        if self.json {
            return self.print_json(bucket);
        }

        let mut out = io::stdout().lock();
        writeln!(out, "date      {}", date.format("%Y-%m-%d (%a)"))?;
        if let Some(name) = holiday {
            writeln!(out, "holiday   {}", self.paint(name, "31"))?;
        }
        match &bucket.day_event {
            Some(event) => writeln!(out, "event     {}", describe_event(event))?,
            None => writeln!(out, "event     -")?,
        }
        if let Some(event) = &bucket.day_event {
            writeln!(out, "record    {}", event.record_id)?;
        }

        if bucket.maintenance.is_empty() {
            return Ok(());
        }

        writeln!(out)?;
        let headers = vec![
            "Record".to_string(),
            "Ticket".to_string(),
            "Time".to_string(),
            "Location".to_string(),
            "Notes".to_string(),
        ];
        let rows = bucket
            .maintenance
            .iter()
            .map(|entry| {
                vec![
                    entry.record_id.clone(),
                    self.paint(&entry.maintenance_id, "33"),
                    entry.scheduled_time.clone().unwrap_or_default(),
                    entry.location.clone().unwrap_or_default(),
                    entry.notes.clone().unwrap_or_default(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_holiday_status(
        &self,
        date: NaiveDate,
        region: Region,
        name: Option<&str>,
    ) -> anyhow::Result<()> {
        if self.json {
            #[derive(Serialize)]
            struct Status<'a> {
                date: NaiveDate,
                region: Region,
                holiday: bool,
                name: Option<&'a str>,
            }
            return self.print_json(&Status {
                date,
                region,
                holiday: name.is_some(),
                name,
            });
        }

        let mut out = io::stdout().lock();
        match name {
            Some(name) => writeln!(
                out,
                "{} is a holiday in {}: {}",
                date,
                region.name(),
                self.paint(name, "31")
            )?,
            None => writeln!(out, "{} is not a holiday in {}", date, region.name())?,
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, holidays))]
    pub fn print_holidays(&self, region: Region, holidays: &[Holiday]) -> anyhow::Result<()> {
        if self.json {
            return self.print_json(&holidays);
        }

        let mut out = io::stdout().lock();
        writeln!(out, "{} ({})", region.name(), region.code())?;
        let headers = vec!["Date".to_string(), "Holiday".to_string(), "Scope".to_string()];
        let rows = holidays
            .iter()
            .map(|holiday| {
                let scope = match holiday.scope {
                    HolidayScope::National => "national".to_string(),
                    HolidayScope::Regions(_) => region.code().to_string(),
                };
                vec![
                    holiday.date.format("%Y-%m-%d %a").to_string(),
                    holiday.name.to_string(),
                    scope,
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_summary(&self, summary: &AnnualSummary) -> anyhow::Result<()> {
        if self.json {
            return self.print_json(summary);
        }

        let mut out = io::stdout().lock();
        let remaining = summary.vacation_remaining.to_string();
        let remaining = if summary.vacation_remaining < 0 {
            self.paint(&remaining, "31")
        } else {
            remaining
        };

        writeln!(out, "year             {}", summary.year)?;
        writeln!(out, "overtime hours   {:.1}", summary.overtime_hours)?;
        writeln!(out, "holidays         {}", summary.holiday_count)?;
        writeln!(out, "vacation left    {remaining}")?;
        writeln!(out, "guard blocks     {}", summary.shift_blocks)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, days))]
    pub fn print_month(&self, days: &[CalendarDay]) -> anyhow::Result<()> {
        if self.json {
            return self.print_json(&days);
        }

        let mut out = io::stdout().lock();
        let headers = vec![
            "Day".to_string(),
            "Event".to_string(),
            "Maint.".to_string(),
            "Holiday".to_string(),
        ];
        let rows = days
            .iter()
            .map(|day| {
                let label = day.date.format("%d %a").to_string();
                let label = if day.holiday || day.date.weekday().number_from_monday() > 5 {
                    self.paint(&label, "31")
                } else {
                    label
                };
                let event = day
                    .bucket
                    .day_event
                    .as_ref()
                    .map(|event| self.paint(&describe_event(event), kind_color(event.kind)))
                    .unwrap_or_default();
                let maintenance = match day.bucket.maintenance.len() {
                    0 => String::new(),
                    n => n.to_string(),
                };
                vec![
                    label,
                    event,
                    maintenance,
                    day.holiday_name.unwrap_or_default().to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn describe_event(event: &DayEvent) -> String {
    match (event.kind, event.hours) {
        (DayEventKind::Extra, Some(hours)) => format!("extra {hours:.1}h"),
        (kind, _) => kind.to_string(),
    }
}

fn kind_color(kind: DayEventKind) -> &'static str {
    match kind {
        DayEventKind::Extra => "36",
        DayEventKind::Guardia => "35",
        DayEventKind::Vacaciones => "32",
        DayEventKind::Festivo => "31",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
