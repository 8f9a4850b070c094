//! Schedule cadence: `rate(<n> <unit>)` or a cron expression, plus trigger jitter.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("invalid rate expression '{0}' (expected rate(<n> minute(s)|hour(s)|day(s)))")]
    Rate(String),

    #[error("invalid cron expression '{expr}': {source}")]
    Cron {
        expr: String,
        #[source]
        source: cron::error::Error,
    },
}

/// When a source fires.
#[derive(Clone)]
pub enum Cadence {
    /// Fixed interval, first tick one interval after start.
    Rate(Duration),
    Cron {
        expr: String,
        schedule: Box<Schedule>,
    },
}

impl Cadence {
    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Rate(interval) => chrono::Duration::from_std(*interval)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
            Self::Cron { schedule, .. } => schedule.after(&after).next(),
        }
    }

    /// Time to wait from `now` until the next fire time.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.next_after(now)?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl FromStr for Cadence {
    type Err = CadenceError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        if let Some(inner) = expr.strip_prefix("rate(").and_then(|r| r.strip_suffix(')')) {
            return parse_rate(inner)
                .map(Self::Rate)
                .ok_or_else(|| CadenceError::Rate(expr.to_string()));
        }
        parse_cron(expr)
            .map(|schedule| Self::Cron {
                expr: expr.to_string(),
                schedule: Box::new(schedule),
            })
            .map_err(|source| CadenceError::Cron {
                expr: expr.to_string(),
                source,
            })
    }
}

impl fmt::Debug for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate(d) => write!(f, "Rate({}s)", d.as_secs()),
            Self::Cron { expr, .. } => write!(f, "Cron({expr})"),
        }
    }
}

fn parse_rate(inner: &str) -> Option<Duration> {
    let mut parts = inner.split_whitespace();
    let n: u64 = parts.next()?.parse().ok().filter(|n| *n > 0)?;
    let unit_secs = match parts.next()? {
        "minute" | "minutes" => 60,
        "hour" | "hours" => 3_600,
        "day" | "days" => 86_400,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    n.checked_mul(unit_secs).map(Duration::from_secs)
}

/// Parse a cron expression, prepending a seconds field to 5-field input.
fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    if expr.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

/// Uniform random delay in `[0, window]`.
pub fn jitter(window: Duration) -> Duration {
    if window.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=window.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn parses_rates() {
        let cases = [
            ("rate(1 day)", 86_400),
            ("rate(6 hours)", 6 * 3_600),
            ("rate(1 minute)", 60),
            (" rate(30 minutes) ", 1_800),
        ];
        for (expr, secs) in cases {
            match expr.parse::<Cadence>().unwrap() {
                Cadence::Rate(d) => assert_eq!(d.as_secs(), secs, "{expr}"),
                other => panic!("{expr} parsed as {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_bad_rates() {
        for expr in ["rate(0 days)", "rate(2 weeks)", "rate(days)", "rate(1 day extra)"] {
            assert!(matches!(expr.parse::<Cadence>(), Err(CadenceError::Rate(_))), "{expr}");
        }
    }

    #[test]
    fn five_field_cron_is_prefixed() {
        let cadence: Cadence = "0 */2 * * *".parse().unwrap();
        assert_eq!(cadence.next_after(at(1, 30)), Some(at(2, 0)));
        assert_eq!(cadence.next_after(at(2, 0)), Some(at(4, 0)));
    }

    #[test]
    fn six_field_cron_passes_through() {
        let cadence: Cadence = "0 15 * * * *".parse().unwrap();
        assert_eq!(cadence.next_after(at(1, 0)), Some(at(1, 15)));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        assert!(matches!(
            "not a cron".parse::<Cadence>(),
            Err(CadenceError::Cron { .. })
        ));
    }

    #[test]
    fn rate_delay_is_one_interval() {
        let cadence: Cadence = "rate(6 hours)".parse().unwrap();
        assert_eq!(cadence.delay_from(at(0, 0)), Some(Duration::from_secs(6 * 3_600)));
    }

    #[test]
    fn jitter_stays_in_window() {
        let window = Duration::from_secs(900);
        for _ in 0..100 {
            assert!(jitter(window) <= window);
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
