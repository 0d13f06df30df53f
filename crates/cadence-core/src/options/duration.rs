//! ScriptDuration - script の duration literal
//!
//! 書かれた通りの segment（`1h30m`, `1mo`）を保持し、表示も元の綴りのまま。
//! 月・年は長さが一定でないので、長さは基準時刻から計算します。

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::Error;
use crate::script::ast::{DurationSegment, DurationUnit};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ScriptDuration {
    negative: bool,
    segments: Vec<DurationSegment>,
}

impl ScriptDuration {
    pub fn new(segments: Vec<DurationSegment>) -> Self {
        Self {
            negative: false,
            segments,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn negated(mut self) -> Self {
        self.negative = !self.negative;
        self
    }

    pub fn is_negative(&self) -> bool {
        self.negative && !self.is_zero()
    }

    pub fn is_zero(&self) -> bool {
        self.segments.iter().all(|s| s.magnitude == 0)
    }

    pub fn segments(&self) -> &[DurationSegment] {
        &self.segments
    }

    /// Length of this duration when applied at `reference`.
    ///
    /// Returns `None` if the result leaves chrono's representable range.
    pub fn length_from(&self, reference: DateTime<Utc>) -> Option<Duration> {
        let mut end = reference;
        for segment in &self.segments {
            end = add_segment(end, segment, self.negative)?;
        }
        Some(end - reference)
    }
}

fn add_segment(at: DateTime<Utc>, segment: &DurationSegment, negative: bool) -> Option<DateTime<Utc>> {
    let n = segment.magnitude;
    let months = match segment.unit {
        DurationUnit::Year => Some(n.checked_mul(12)?),
        DurationUnit::Month => Some(n),
        _ => None,
    };
    if let Some(months) = months {
        let months = Months::new(u32::try_from(months).ok()?);
        return if negative {
            at.checked_sub_months(months)
        } else {
            at.checked_add_months(months)
        };
    }

    let fixed = match segment.unit {
        DurationUnit::Week => Duration::try_weeks(n)?,
        DurationUnit::Day => Duration::try_days(n)?,
        DurationUnit::Hour => Duration::try_hours(n)?,
        DurationUnit::Minute => Duration::try_minutes(n)?,
        DurationUnit::Second => Duration::try_seconds(n)?,
        DurationUnit::Millisecond => Duration::try_milliseconds(n)?,
        DurationUnit::Microsecond => Duration::microseconds(n),
        DurationUnit::Nanosecond => Duration::nanoseconds(n),
        DurationUnit::Year | DurationUnit::Month => return None,
    };
    if negative {
        at.checked_sub_signed(fixed)
    } else {
        at.checked_add_signed(fixed)
    }
}

impl fmt::Display for ScriptDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("0s");
        }
        if self.negative {
            f.write_str("-")?;
        }
        for segment in &self.segments {
            write!(f, "{}{}", segment.magnitude, segment.unit)?;
        }
        Ok(())
    }
}

impl FromStr for ScriptDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::invalid(format!("invalid duration {s:?}"));
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::zero());
        }
        let (negative, mut rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let mut segments = Vec::new();
        while !rest.is_empty() {
            let digits_end = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
            if digits_end == 0 {
                return Err(invalid());
            }
            let magnitude = rest[..digits_end].parse::<i64>().map_err(|_| invalid())?;
            rest = &rest[digits_end..];

            let unit_end = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
            let unit = DurationUnit::parse(&rest[..unit_end]).ok_or_else(invalid)?;
            rest = &rest[unit_end..];

            segments.push(DurationSegment { magnitude, unit });
        }
        Ok(Self { negative, segments })
    }
}

impl Serialize for ScriptDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScriptDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case("1h", "1h")]
    #[case("1h30m", "1h30m")]
    #[case("-5m", "-5m")]
    #[case("0s", "0s")]
    #[case("", "0s")]
    #[case("250ms", "250ms")]
    fn keeps_source_spelling(#[case] raw: &str, #[case] shown: &str) {
        let d: ScriptDuration = raw.parse().unwrap();
        assert_eq!(d.to_string(), shown);
    }

    #[rstest]
    #[case("5")]
    #[case("h")]
    #[case("5parsecs")]
    #[case("1h-2m")]
    fn rejects_malformed(#[case] raw: &str) {
        assert!(raw.parse::<ScriptDuration>().is_err());
    }

    #[test]
    fn calendar_units_depend_on_reference() {
        let month: ScriptDuration = "1mo".parse().unwrap();
        let feb = Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(month.length_from(feb), Some(Duration::days(28)));
        assert_eq!(month.length_from(mar), Some(Duration::days(31)));
    }

    #[test]
    fn negative_lengths() {
        let d: ScriptDuration = "-1h30m".parse().unwrap();
        let at = Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(d.length_from(at), Some(Duration::minutes(-90)));
        assert!(d.is_negative());
    }

    #[test]
    fn serializes_as_string() {
        let d: ScriptDuration = "5m".parse().unwrap();
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"5m\"");
        let back: ScriptDuration = serde_json::from_str("\"5m\"").unwrap();
        assert_eq!(back, d);
    }
}
