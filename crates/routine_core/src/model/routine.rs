use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How often a routine fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    TwiceAWeek,
    Weekly,
    BiWeekly,
    Monthly,
    BiMonthly,
    Quarterly,
    SemiAnnually,
    Annually,
}

impl Frequency {
    pub const ALL: [Frequency; 9] = [
        Frequency::Daily,
        Frequency::TwiceAWeek,
        Frequency::Weekly,
        Frequency::BiWeekly,
        Frequency::Monthly,
        Frequency::BiMonthly,
        Frequency::Quarterly,
        Frequency::SemiAnnually,
        Frequency::Annually,
    ];

    /// Nominal number of days between two instances.
    pub fn days(self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::TwiceAWeek => 3,
            Self::Weekly => 7,
            Self::BiWeekly => 14,
            Self::Monthly => 30,
            Self::BiMonthly => 60,
            Self::Quarterly => 90,
            Self::SemiAnnually => 180,
            Self::Annually => 365,
        }
    }

    /// Minimum number of pending instances the next seven days should hold.
    pub fn pending_floor(self) -> usize {
        match self {
            Self::Daily => 3,
            Self::TwiceAWeek => 2,
            _ => 1,
        }
    }

    /// Ideal-day alignment only applies from weekly upwards.
    pub fn supports_ideal_day(self) -> bool {
        self.days() >= 7
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::TwiceAWeek => "twice_a_week",
            Self::Weekly => "weekly",
            Self::BiWeekly => "bi_weekly",
            Self::Monthly => "monthly",
            Self::BiMonthly => "bi_monthly",
            Self::Quarterly => "quarterly",
            Self::SemiAnnually => "semi_annually",
            Self::Annually => "annually",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let cleaned = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|frequency| frequency.as_str() == cleaned || frequency.as_str().replace('_', "") == cleaned)
            .ok_or_else(|| AppError::invalid_input(format!("unknown frequency '{raw}'")))
    }
}

/// Advisory time budget for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Duration {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
}

impl Duration {
    pub const ALL: [Duration; 6] = [
        Duration::FiveMinutes,
        Duration::FifteenMinutes,
        Duration::ThirtyMinutes,
        Duration::OneHour,
        Duration::TwoHours,
        Duration::FourHours,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::ThirtyMinutes => 30,
            Self::OneHour => 60,
            Self::TwoHours => 120,
            Self::FourHours => 240,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Duration {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let cleaned = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|duration| duration.as_str() == cleaned)
            .ok_or_else(|| AppError::invalid_input(format!("unknown duration '{raw}'")))
    }
}

/// Preferred part of the day. Setting one anchors the instance to that hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    /// Local hour (0-23) the preference maps to.
    pub fn hour(self) -> u8 {
        match self {
            Self::Morning => 9,
            Self::Afternoon => 14,
            Self::Evening => 19,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeOfDay {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(Self::Morning),
            "afternoon" => Ok(Self::Afternoon),
            "evening" => Ok(Self::Evening),
            _ => Err(AppError::invalid_input(format!("unknown time of day '{raw}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub frequency: Frequency,
    pub duration: Duration,
    #[serde(default)]
    pub time_of_day: Option<TimeOfDay>,
    /// 0 = Sunday .. 6 = Saturday.
    #[serde(default)]
    pub ideal_day: Option<u8>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub priority: u8,
    #[serde(default)]
    pub defer: bool,
    #[serde(default)]
    pub deferral_date: Option<i64>,
    #[serde(default)]
    pub undeferred_date: Option<i64>,
    #[serde(default)]
    pub last_completed_date: Option<i64>,
    pub completion_rate_overall: u8,
    pub completion_rate_month: u8,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields accepted when creating a routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoutine {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub frequency: Frequency,
    pub duration: Duration,
    pub time_of_day: Option<TimeOfDay>,
    pub ideal_day: Option<u8>,
    pub project_id: Option<String>,
    pub labels: Vec<String>,
    pub priority: u8,
}

impl NewRoutine {
    pub fn new<N: Into<String>>(name: N, frequency: Frequency) -> Self {
        Self {
            name: name.into(),
            description: None,
            category: None,
            frequency,
            duration: Duration::FifteenMinutes,
            time_of_day: None,
            ideal_day: None,
            project_id: None,
            labels: Vec::new(),
            priority: 1,
        }
    }
}

/// Partial update. `None` leaves a field untouched; the nested `Option`
/// on optional fields lets callers clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutinePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub frequency: Option<Frequency>,
    pub duration: Option<Duration>,
    pub time_of_day: Option<Option<TimeOfDay>>,
    pub ideal_day: Option<Option<u8>>,
    pub project_id: Option<Option<String>>,
    pub labels: Option<Vec<String>>,
    pub priority: Option<u8>,
}

impl RoutinePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
