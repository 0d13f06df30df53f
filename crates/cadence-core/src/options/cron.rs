//! Cron expression validation.
//!
//! Accepted forms:
//! - 5 fields: minute hour day-of-month month day-of-week
//! - 6 fields: the 5 above plus year
//! - 7 fields: second, the 5 above, year
//! - descriptors: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//!   `@midnight`, `@hourly`, `@every <duration>`
//!
//! Each field takes `*`, `?` (day fields only), numbers, names (months and
//! weekdays), ranges `a-b`, steps `x/n` and comma lists.

use chrono::Utc;

use crate::options::duration::ScriptDuration;

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    question_mark: bool,
}

const MONTHS: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAYS: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

const SECOND: Field = Field {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    question_mark: false,
};
const MINUTE: Field = Field {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    question_mark: false,
};
const HOUR: Field = Field {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    question_mark: false,
};
const DAY_OF_MONTH: Field = Field {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    question_mark: true,
};
const MONTH: Field = Field {
    name: "month",
    min: 1,
    max: 12,
    names: MONTHS,
    question_mark: false,
};
const DAY_OF_WEEK: Field = Field {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAYS,
    question_mark: true,
};
const YEAR: Field = Field {
    name: "year",
    min: 1970,
    max: 2099,
    names: &[],
    question_mark: false,
};

const DESCRIPTORS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Check `expr`; the error is a human-readable reason.
pub fn validate_cron(expr: &str) -> Result<(), String> {
    let expr = expr.trim();
    if let Some(rest) = expr.strip_prefix("@every") {
        return validate_every(rest);
    }
    if expr.starts_with('@') {
        return if DESCRIPTORS.contains(&expr) {
            Ok(())
        } else {
            Err(format!("unknown descriptor {expr:?}"))
        };
    }

    let parts: Vec<&str> = expr.split_whitespace().collect();
    let fields: &[&Field] = match parts.len() {
        5 => &[&MINUTE, &HOUR, &DAY_OF_MONTH, &MONTH, &DAY_OF_WEEK],
        6 => &[&MINUTE, &HOUR, &DAY_OF_MONTH, &MONTH, &DAY_OF_WEEK, &YEAR],
        7 => &[&SECOND, &MINUTE, &HOUR, &DAY_OF_MONTH, &MONTH, &DAY_OF_WEEK, &YEAR],
        n => return Err(format!("expected 5 to 7 fields, found {n}")),
    };

    for (part, field) in parts.iter().zip(fields) {
        validate_field(part, field)?;
    }
    Ok(())
}

fn validate_every(rest: &str) -> Result<(), String> {
    let raw = rest.trim();
    if raw.is_empty() || !rest.starts_with(char::is_whitespace) {
        return Err("@every requires a duration".into());
    }
    let every: ScriptDuration = raw.parse().map_err(|_| format!("invalid @every duration {raw:?}"))?;
    match every.length_from(Utc::now()) {
        Some(length) if length > chrono::Duration::zero() => Ok(()),
        _ => Err(format!("@every duration must be positive, got {raw:?}")),
    }
}

fn validate_field(part: &str, field: &Field) -> Result<(), String> {
    let bad = || format!("syntax error in {} field: {part:?}", field.name);

    if part == "?" {
        return if field.question_mark { Ok(()) } else { Err(bad()) };
    }

    for item in part.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => return Err(bad()),
            }
        }

        if range == "*" {
            continue;
        }
        let (lo, hi) = match range.split_once('-') {
            Some((lo, hi)) => (value(lo, field).ok_or_else(bad)?, value(hi, field).ok_or_else(bad)?),
            None => {
                let v = value(range, field).ok_or_else(bad)?;
                (v, v)
            }
        };
        if lo > hi {
            return Err(format!(
                "{} field range {part:?} runs backwards",
                field.name
            ));
        }
    }
    Ok(())
}

fn value(raw: &str, field: &Field) -> Option<u32> {
    let upper = raw.to_ascii_uppercase();
    if let Some(i) = field.names.iter().position(|n| *n == upper) {
        // names are 1-based for months, 0-based for weekdays
        return Some(i as u32 + field.min.min(1));
    }
    let v = raw.parse::<u32>().ok()?;
    (field.min..=field.max).contains(&v).then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("* * * * *")]
    #[case("0 * * * *")]
    #[case("*/15 9-17 * * MON-FRI")]
    #[case("0 0 1,15 jan,jul ?")]
    #[case("* * ? * *")]
    #[case("0 0 12 * * ? 2030")]
    #[case("0 0 * * * 2030")]
    #[case("@hourly")]
    #[case("@every 1h30m")]
    fn accepts(#[case] expr: &str) {
        assert_eq!(validate_cron(expr), Ok(()));
    }

    #[rstest]
    #[case("* * * *", "expected 5 to 7 fields, found 4")]
    #[case("60 * * * *", "syntax error in minute field: \"60\"")]
    #[case("? * * * *", "syntax error in minute field: \"?\"")]
    #[case("*/0 * * * *", "syntax error in minute field: \"*/0\"")]
    #[case("5-1 * * * *", "minute field range \"5-1\" runs backwards")]
    #[case("@fortnightly", "unknown descriptor \"@fortnightly\"")]
    #[case("@every", "@every requires a duration")]
    #[case("@every 0s", "@every duration must be positive, got \"0s\"")]
    fn rejects(#[case] expr: &str, #[case] reason: &str) {
        assert_eq!(validate_cron(expr), Err(reason.to_string()));
    }
}
