use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use log::warn;
use serde::{Deserialize, Serialize};

/// Opaque identifier of a [`Trigger`].
///
/// Fresh ids are UUID v4 strings, but any string read back from the store is
/// accepted as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    #[must_use]
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TriggerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TriggerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("expected HH:MM, got {0:?}")]
    Format(String),
    #[error("hour {0} is out of range (0-23)")]
    Hour(u32),
    #[error("minute {0} is out of range (0-59)")]
    Minute(u32),
}

/// Strictly parses a 24 hour `HH:MM` string (the hour may be a single digit,
/// the minute is always two).
pub fn parse_time_str(time_str: &str) -> Result<NaiveTime, TimeParseError> {
    let format_err = || TimeParseError::Format(time_str.to_string());
    let (hour, minute) = time_str.trim().split_once(':').ok_or_else(format_err)?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(hour) || hour.len() > 2 || !all_digits(minute) || minute.len() != 2 {
        return Err(format_err());
    }
    let hour: u32 = hour.parse().map_err(|_| format_err())?;
    let minute: u32 = minute.parse().map_err(|_| format_err())?;
    if hour > 23 {
        return Err(TimeParseError::Hour(hour));
    }
    if minute > 59 {
        return Err(TimeParseError::Minute(minute));
    }
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(format_err)
}

/// Truncates a timestamp to its calendar minute (seconds and below zeroed).
#[must_use]
pub fn calendar_minute(at: NaiveDateTime) -> (NaiveDate, u32, u32) {
    (at.date(), at.hour(), at.minute())
}

/// Runtime firing state, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastFired {
    /// Never fired. Holds the minute the trigger was built in so it can't go
    /// off immediately when created inside its own target minute.
    Armed(NaiveDateTime),
    Fired(NaiveDateTime),
}

impl LastFired {
    #[must_use]
    pub fn armed_now() -> Self {
        Self::armed_at(chrono::Local::now().naive_local())
    }

    #[must_use]
    pub fn armed_at(at: NaiveDateTime) -> Self {
        let minute = at
            .with_second(0)
            .and_then(|at| at.with_nanosecond(0))
            .unwrap_or(at);
        Self::Armed(minute)
    }

    #[must_use]
    pub const fn at(&self) -> NaiveDateTime {
        match self {
            Self::Armed(at) | Self::Fired(at) => *at,
        }
    }

    #[must_use]
    pub const fn has_fired(&self) -> bool {
        matches!(self, Self::Fired(_))
    }
}

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

/// represents one scheduled reminder.
/// the schedule is a time of day plus a repeat policy, the payload is an
/// optional sound and a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default = "TriggerId::fresh")]
    id: TriggerId,
    /// kept as entered so a malformed value still round trips
    time_str: String,
    #[serde(default = "always_true")]
    repeat_daily: bool,
    #[serde(default = "always_true")]
    enabled: bool,
    /// `None` means the sink picks its default sound
    #[serde(default)]
    audio_file: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(skip, default = "LastFired::armed_now")]
    last_fired: LastFired,
}

/// Fields for a trigger that doesn't exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrigger {
    pub time_str: String,
    pub repeat_daily: bool,
    pub audio_file: Option<String>,
    pub message: String,
}

impl NewTrigger {
    #[must_use]
    pub fn daily(time_str: impl Into<String>) -> Self {
        Self {
            time_str: time_str.into(),
            repeat_daily: true,
            audio_file: None,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn once(time_str: impl Into<String>) -> Self {
        Self {
            repeat_daily: false,
            ..Self::daily(time_str)
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn with_audio(mut self, audio_file: impl Into<String>) -> Self {
        self.audio_file = Some(audio_file.into());
        self
    }
}

/// A single field change, applied through `Scheduler::update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEdit {
    Time(String),
    Repeat(bool),
    Enabled(bool),
    Audio(Option<String>),
    Message(String),
}

impl Trigger {
    /// Builds a trigger armed at the current local minute.
    #[must_use]
    pub fn new(id: TriggerId, fields: NewTrigger) -> Self {
        Self::armed_at(id, fields, chrono::Local::now().naive_local())
    }

    /// Builds a trigger as if it had been created at `created`.
    #[must_use]
    pub fn armed_at(id: TriggerId, fields: NewTrigger, created: NaiveDateTime) -> Self {
        Self {
            id,
            time_str: fields.time_str,
            repeat_daily: fields.repeat_daily,
            enabled: true,
            audio_file: fields.audio_file,
            message: fields.message,
            last_fired: LastFired::armed_at(created),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &TriggerId {
        &self.id
    }

    #[must_use]
    pub fn time_str(&self) -> &str {
        &self.time_str
    }

    #[must_use]
    pub const fn repeat_daily(&self) -> bool {
        self.repeat_daily
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn audio_file(&self) -> Option<&str> {
        self.audio_file.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn last_fired(&self) -> LastFired {
        self.last_fired
    }

    #[must_use]
    pub fn has_valid_time(&self) -> bool {
        parse_time_str(&self.time_str).is_ok()
    }

    /// The scheduled time of day. Never fails: a malformed `time_str` is
    /// logged and read as midnight.
    #[must_use]
    pub fn time_of_day(&self) -> NaiveTime {
        parse_time_str(&self.time_str).unwrap_or_else(|e| {
            warn!("trigger {}: invalid time {e}, using 00:00", self.id);
            NaiveTime::MIN
        })
    }

    // silent variant for the poll loop and sorting, the anomaly is reported
    // when the trigger enters the scheduler
    pub(crate) fn scheduled_time(&self) -> NaiveTime {
        parse_time_str(&self.time_str).unwrap_or(NaiveTime::MIN)
    }

    /// Decides whether the trigger goes off at `now`, recording the fire if so.
    ///
    /// A daily trigger fires at most once per calendar minute, a one shot
    /// trigger at most once ever.
    pub(crate) fn should_fire(&mut self, now: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        let scheduled = self.scheduled_time();
        if now.hour() != scheduled.hour() || now.minute() != scheduled.minute() {
            return false;
        }
        if !self.repeat_daily && self.last_fired.has_fired() {
            return false;
        }
        if calendar_minute(self.last_fired.at()) == calendar_minute(now) {
            return false;
        }
        self.last_fired = LastFired::Fired(now);
        true
    }

    pub(crate) fn apply(&mut self, edit: TriggerEdit) {
        match edit {
            TriggerEdit::Time(time_str) => self.time_str = time_str,
            TriggerEdit::Repeat(repeat_daily) => self.repeat_daily = repeat_daily,
            TriggerEdit::Enabled(enabled) => self.enabled = enabled,
            TriggerEdit::Audio(audio_file) => self.audio_file = audio_file,
            TriggerEdit::Message(message) => self.message = message,
        }
    }

    pub(crate) fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.enabled
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}",
            self.time_str,
            if self.repeat_daily { "daily" } else { "once" },
            if self.enabled { "on" } else { "off" },
            if self.message.is_empty() {
                String::new()
            } else {
                format!(" \"{}\"", self.message)
            }
        )
    }
}
