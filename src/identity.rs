//! Stream identities and start positions.
//!
//! A [`StreamIdentity`] names a remote stream by name, ARN, or both. The two
//! fields are alternate keys into the same catalog entry, so matching is
//! done on either one, ignoring ASCII case.
//!
//! A [`StartSelector`] chooses where in the stream's timeline retrieval
//! begins.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::error::PipeError;

/// Name and/or ARN of a remote stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamIdentity {
    /// Stream name, if known.
    pub name: Option<String>,
    /// Stream ARN, if known.
    pub arn: Option<String>,
}

impl StreamIdentity {
    /// Create an identity from both keys.
    pub fn new(name: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            arn: Some(arn.into()),
        }
    }

    /// Create an identity known only by name.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            arn: None,
        }
    }

    /// Create an identity known only by ARN.
    pub fn from_arn(arn: impl Into<String>) -> Self {
        Self {
            name: None,
            arn: Some(arn.into()),
        }
    }

    /// Whether at least one key is present.
    pub fn is_resolved(&self) -> bool {
        self.name.is_some() || self.arn.is_some()
    }

    /// Whether this catalog entry matches the given name or ARN.
    ///
    /// Comparison ignores ASCII case. An absent key never matches.
    pub fn matches(&self, name: Option<&str>, arn: Option<&str>) -> bool {
        let same = |ours: &Option<String>, theirs: Option<&str>| match (ours, theirs) {
            (Some(ours), Some(theirs)) => ours.eq_ignore_ascii_case(theirs),
            _ => false,
        };
        same(&self.name, name) || same(&self.arn, arn)
    }
}

impl Display for StreamIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match (&self.name, &self.arn) {
            (Some(name), Some(arn)) => write!(f, "{name} ({arn})"),
            (Some(name), None) => write!(f, "{name}"),
            (None, Some(arn)) => write!(f, "{arn}"),
            (None, None) => write!(f, "<unresolved stream>"),
        }
    }
}

/// Where in the remote stream's timeline to begin retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSelector {
    /// Begin at the live edge.
    Now,
    /// Begin at the oldest retained fragment.
    Earliest,
    /// Begin at or after the given producer timestamp.
    AtTimestamp(SystemTime),
}

impl StartSelector {
    /// Parse a start position relative to `now`.
    ///
    /// Accepts `now`, `earliest` (ASCII case ignored), or a duration in the
    /// forms understood by [`parse_duration`], meaning "that long before
    /// `now`".
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::InvalidArgument`] if `whence` is none of the
    /// above or reaches before the Unix epoch.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::{Duration, SystemTime};
    ///
    /// use kinesis_pipe::StartSelector;
    ///
    /// let now = SystemTime::now();
    /// assert_eq!(StartSelector::parse("now", now)?, StartSelector::Now);
    /// assert_eq!(
    ///     StartSelector::parse("5m", now)?,
    ///     StartSelector::AtTimestamp(now - Duration::from_secs(300)),
    /// );
    /// # Ok::<(), kinesis_pipe::PipeError>(())
    /// ```
    pub fn parse(whence: &str, now: SystemTime) -> Result<Self, PipeError> {
        let trimmed = whence.trim();
        if trimmed.eq_ignore_ascii_case("now") {
            return Ok(StartSelector::Now);
        }
        if trimmed.eq_ignore_ascii_case("earliest") {
            return Ok(StartSelector::Earliest);
        }

        let ago = parse_duration(trimmed)?;
        now.checked_sub(ago)
            .filter(|start| start.duration_since(UNIX_EPOCH).is_ok())
            .map(StartSelector::AtTimestamp)
            .ok_or_else(|| {
                PipeError::InvalidArgument(format!("start {trimmed:?} reaches before the epoch"))
            })
    }
}

/// Parse a duration in human (`90s`, `1m 30s`) or ISO-8601 (`PT1M30S`) form.
///
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns [`PipeError::InvalidArgument`] if the value matches none of the
/// accepted forms.
pub fn parse_duration(value: &str) -> Result<Duration, PipeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PipeError::InvalidArgument(
            "duration cannot be empty".to_string(),
        ));
    }

    if let Ok(seconds) = trimmed.parse::<f64>()
        && seconds.is_finite()
        && seconds >= 0.0
    {
        return seconds_to_duration(seconds, trimmed);
    }

    if trimmed.starts_with(['P', 'p']) {
        return parse_iso8601_duration(trimmed);
    }

    humantime::parse_duration(trimmed)
        .map_err(|error| PipeError::InvalidArgument(format!("invalid duration {trimmed:?}: {error}")))
}

/// Parse the day/time subset of ISO-8601 durations: `P[nD][T[nH][nM][nS]]`.
fn parse_iso8601_duration(value: &str) -> Result<Duration, PipeError> {
    let invalid = || PipeError::InvalidArgument(format!("invalid ISO-8601 duration {value:?}"));

    let upper = value.to_ascii_uppercase();
    let body = upper.strip_prefix('P').ok_or_else(invalid)?;
    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut seconds = 0.0_f64;
    let mut seen_component = false;

    let mut accumulate = |part: &str, units: &[(char, f64)]| -> Result<(), PipeError> {
        let mut number = String::new();
        let mut unit_index = 0;
        for character in part.chars() {
            if character.is_ascii_digit() || character == '.' {
                number.push(character);
                continue;
            }
            let position = units[unit_index..]
                .iter()
                .position(|(unit, _)| *unit == character)
                .ok_or_else(invalid)?;
            let (_, scale) = units[unit_index + position];
            let amount: f64 = number.parse().map_err(|_| invalid())?;
            seconds += amount * scale;
            seen_component = true;
            unit_index += position + 1;
            number.clear();
        }
        if number.is_empty() { Ok(()) } else { Err(invalid()) }
    };

    accumulate(date_part, &[('D', 86_400.0)])?;
    if let Some(time_part) = time_part {
        if time_part.is_empty() {
            return Err(invalid());
        }
        accumulate(time_part, &[('H', 3_600.0), ('M', 60.0), ('S', 1.0)])?;
    }

    if !seen_component {
        return Err(invalid());
    }
    seconds_to_duration(seconds, value)
}

fn seconds_to_duration(seconds: f64, value: &str) -> Result<Duration, PipeError> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|error| PipeError::InvalidArgument(format!("invalid duration {value:?}: {error}")))
}
