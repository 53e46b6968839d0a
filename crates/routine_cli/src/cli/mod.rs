use clap::{Parser, Subcommand};
use routine_core::config::ConfigOverrides;
use routine_core::error::AppError;
use routine_core::model::{Duration, Frequency, TaskStatus, TimeOfDay};
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new routine
    ///
    /// Example: routines add "Stretch" --frequency daily --time-of-day morning
    /// Example: routines add "Review finances" --frequency monthly --ideal-day friday
    Add {
        name: Option<String>,
        #[arg(short, long, value_parser = parse_model::<Frequency>)]
        frequency: Frequency,
        #[arg(long, value_parser = parse_model::<Duration>, default_value = "15m")]
        duration: Duration,
        #[arg(long, value_parser = parse_model::<TimeOfDay>)]
        time_of_day: Option<TimeOfDay>,
        #[arg(long, value_parser = parse_weekday)]
        ideal_day: Option<u8>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long, default_value_t = 1)]
        priority: u8,
    },
    /// Edit a routine
    ///
    /// Example: routines edit routine-1 --priority 3
    /// Example: routines edit routine-1 --clear-ideal-day
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long, value_parser = parse_model::<Frequency>)]
        frequency: Option<Frequency>,
        #[arg(long, value_parser = parse_model::<Duration>)]
        duration: Option<Duration>,
        #[arg(long, value_parser = parse_model::<TimeOfDay>, conflicts_with = "clear_time_of_day")]
        time_of_day: Option<TimeOfDay>,
        #[arg(long)]
        clear_time_of_day: bool,
        #[arg(long, value_parser = parse_weekday, conflicts_with = "clear_ideal_day")]
        ideal_day: Option<u8>,
        #[arg(long)]
        clear_ideal_day: bool,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Replaces every label
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long)]
        priority: Option<u8>,
    },
    /// Delete a routine (its history is kept)
    ///
    /// Example: routines delete routine-1
    Delete {
        id: String,
    },
    /// Pause a routine
    ///
    /// Example: routines defer routine-1
    Defer {
        id: String,
    },
    /// Resume a paused routine
    ///
    /// Example: routines undefer routine-1
    Undefer {
        id: String,
    },
    /// Show details of a routine
    ///
    /// Example: routines show routine-1
    Show {
        id: String,
    },
    /// Skip a pending task
    ///
    /// Example: routines skip task-1
    Skip {
        id: String,
    },
    /// Mark a pending task as completed
    ///
    /// Example: routines done task-1
    /// Example: routines done 7025489321 --external
    Done {
        id: String,
        /// Treat ID as the external service's task id
        #[arg(long)]
        external: bool,
    },
    /// Run one scheduling cycle
    ///
    /// Example: routines run
    Run,
    /// Run scheduling cycles on an interval
    ///
    /// Example: routines daemon --interval-secs 3600
    Daemon {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// List routines or tasks
    ///
    /// Example: routines list routines
    /// Example: routines list tasks --status pending
    List {
        #[command(subcommand)]
        list: ListCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ListCommand {
    /// List all routines
    ///
    /// Example: routines list routines
    Routines,
    /// List generated tasks
    ///
    /// Example: routines list tasks --routine routine-1
    Tasks {
        #[arg(long)]
        routine: Option<String>,
        #[arg(long, value_parser = parse_model::<TaskStatus>)]
        status: Option<TaskStatus>,
    },
}

fn parse_model<T: FromStr<Err = AppError>>(raw: &str) -> Result<T, String> {
    raw.parse().map_err(|err: AppError| err.message().to_string())
}

const WEEKDAYS: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

/// Accepts a day number (0 = Sunday) or a day name, full or abbreviated.
pub fn parse_weekday(raw: &str) -> Result<u8, String> {
    let cleaned = raw.trim().to_ascii_lowercase();
    if let Ok(number) = cleaned.parse::<u8>() {
        return if number <= 6 {
            Ok(number)
        } else {
            Err(format!("day number must be between 0 and 6, got {number}"))
        };
    }
    if cleaned.len() >= 3
        && let Some(index) = WEEKDAYS.iter().position(|day| day.starts_with(&cleaned))
    {
        return Ok(index as u8);
    }
    Err(format!("unknown day '{raw}'"))
}

pub fn weekday_name(day: u8) -> &'static str {
    WEEKDAYS.get(usize::from(day)).copied().unwrap_or("?")
}

/// Flag name used to identify config override arguments by the runtime.
pub const CONFIG_OVERRIDE_FLAG: &str = "--config-override";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalField {
    BaseUrl,
    ApiToken,
    ProjectId,
    TimeoutSecs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    UtcOffsetMinutes,
    MissedGraceDays,
    IntervalSecs,
    LogLevel,
    External(ExternalField),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let (field, remainder) = key_raw
        .split_once('.')
        .map(|(field, rest)| (field.trim(), Some(rest.trim())))
        .unwrap_or((key_raw.trim(), None));

    let canonical_field =
        canonicalize_flag_name(field).ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "external" => {
            let subfield = remainder
                .and_then(canonicalize_flag_name)
                .ok_or_else(|| "external override requires a field name".to_string())?;
            let field = match subfield.as_str() {
                "base_url" | "url" => ExternalField::BaseUrl,
                "api_token" | "token" => ExternalField::ApiToken,
                "project_id" | "project" => ExternalField::ProjectId,
                "timeout_secs" | "timeout" => ExternalField::TimeoutSecs,
                other => return Err(format!("unknown external field '{other}'")),
            };
            ConfigOverrideTarget::External(field)
        }
        other if remainder.is_some() => {
            return Err(format!("{other} override cannot have subfields"));
        }
        "utc_offset_minutes" | "utc_offset" => ConfigOverrideTarget::UtcOffsetMinutes,
        "missed_grace_days" | "grace_days" => ConfigOverrideTarget::MissedGraceDays,
        "interval_secs" | "interval" => ConfigOverrideTarget::IntervalSecs,
        "log_level" => ConfigOverrideTarget::LogLevel,
        other => return Err(format!("unknown config field '{other}'")),
    };

    Ok(ParsedConfigOverride { target, value })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{key} override expects a number, got '{value}'"))
}

/// Folds every raw override into one [`ConfigOverrides`]; later values win.
pub fn build_config_overrides(raw: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let parsed = parse_config_override(entry)?;
        let value = parsed.value;
        match parsed.target {
            ConfigOverrideTarget::UtcOffsetMinutes => {
                overrides.utc_offset_minutes = Some(parse_number("utc_offset_minutes", &value)?);
            }
            ConfigOverrideTarget::MissedGraceDays => {
                overrides.missed_grace_days = Some(parse_number("missed_grace_days", &value)?);
            }
            ConfigOverrideTarget::IntervalSecs => {
                overrides.interval_secs = Some(parse_number("interval_secs", &value)?);
            }
            ConfigOverrideTarget::LogLevel => overrides.log_level = Some(value),
            ConfigOverrideTarget::External(ExternalField::BaseUrl) => {
                overrides.external_base_url = Some(value);
            }
            ConfigOverrideTarget::External(ExternalField::ApiToken) => {
                overrides.external_api_token = Some(value);
            }
            ConfigOverrideTarget::External(ExternalField::ProjectId) => {
                overrides.external_project_id = Some(value);
            }
            ConfigOverrideTarget::External(ExternalField::TimeoutSecs) => {
                overrides.external_timeout_secs = Some(parse_number("external.timeout_secs", &value)?);
            }
        }
    }
    Ok(overrides)
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
