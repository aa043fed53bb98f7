use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "portis",
    version,
    about = "PortisApp work calendar: day events, holidays and yearly totals"
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "portisrc")]
    pub portisrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Set the day event of a date, replacing any previous one.
    Record {
        date: String,
        /// extra, guardia, vacaciones or festivo
        kind: String,
        /// Overtime hours (required for `extra`).
        hours: Option<String>,
    },
    /// Remove the day event of a date.
    Delete { date: String },
    /// Show everything recorded on a date.
    Day { date: String },
    /// Tell whether a date is a holiday.
    Holiday { date: String },
    /// List the holidays of a year.
    Holidays { year: Option<i32> },
    /// Yearly totals: overtime, holidays, vacation left, guard blocks.
    Summary { year: Option<i32> },
    /// Day-by-day view of a month.
    Month { year: i32, month: u32 },
    /// Put a maintenance ticket on the calendar.
    Schedule(ScheduleArgs),
    /// Take a maintenance entry off the calendar.
    Unschedule {
        maintenance_id: String,
        record_id: String,
    },
    /// Show or store the region used for regional holidays.
    Region { code: Option<String> },
    /// Show the effective configuration.
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    pub date: String,
    pub maintenance_id: String,

    #[arg(long)]
    pub location: Option<String>,

    /// Visit time, e.g. 09:30.
    #[arg(long = "time")]
    pub scheduled_time: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    /// Repeat the visit every N months (maintenance contracts).
    #[arg(long, requires = "count")]
    pub every: Option<u32>,

    /// Number of visits when repeating.
    #[arg(long, requires = "every")]
    pub count: Option<u32>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls `rc.key=value` / `rc.key:value` words out of the argument list so
/// they can appear anywhere on the command line.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::*;

    fn args(words: &[&str]) -> Vec<OsString> {
        words.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "portis",
            "summary",
            "rc.calendar.region=CT",
            "2024",
            "rc.vacation.quota:30",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["portis", "summary", "2024"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.calendar.region".to_string(), "CT".to_string()),
                ("rc.vacation.quota".to_string(), "30".to_string()),
            ]
        );
    }

    #[test]
    fn parses_schedule_with_repetition() {
        let cli = GlobalCli::try_parse_from(args(&[
            "portis",
            "schedule",
            "2024-01-31",
            "T-9",
            "--location",
            "Portal 2",
            "--every",
            "1",
            "--count",
            "3",
        ]))
        .expect("parse");

        let Some(Command::Schedule(schedule)) = cli.command else {
            panic!("expected schedule command");
        };
        assert_eq!(schedule.maintenance_id, "T-9");
        assert_eq!(schedule.every, Some(1));
        assert_eq!(schedule.count, Some(3));
        assert_eq!(schedule.location.as_deref(), Some("Portal 2"));
    }

    #[test]
    fn repetition_needs_both_flags() {
        assert!(
            GlobalCli::try_parse_from(args(&[
                "portis",
                "schedule",
                "2024-01-31",
                "T-9",
                "--every",
                "1",
            ]))
            .is_err()
        );
    }
}
