//! Cron and time zone handling for triggers.

use chrono::{DateTime, FixedOffset, Utc};
use croner::Cron;
use croner::parser::{CronParser, Seconds};

use crate::{SchedulerError, TriggerSchedule};

/// Parse a cron pattern. Both 5-part and 6-part (with seconds) patterns are accepted.
pub(crate) fn parse_pattern(expression: &str) -> Result<Cron, SchedulerError> {
    CronParser::builder()
        .seconds(Seconds::Optional)
        .build()
        .parse(expression)
        .map_err(|e| SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a time zone as a fixed UTC offset (`+02:00`, `-0530`) or `UTC`.
pub(crate) fn parse_time_zone(time_zone: Option<&str>) -> Result<FixedOffset, SchedulerError> {
    let utc = FixedOffset::east_opt(0).ok_or_else(|| SchedulerError::InvalidTimeZone("UTC".into()))?;
    match time_zone.map(str::trim) {
        None => Ok(utc),
        Some(tz) if tz.eq_ignore_ascii_case("utc") || tz == "Z" => Ok(utc),
        Some(tz) => tz
            .parse::<FixedOffset>()
            .map_err(|_| SchedulerError::InvalidTimeZone(tz.to_string())),
    }
}

/// Next instant a schedule fires strictly after `after`.
///
/// One-shot schedules always return their instant, even if it has passed,
/// so that a late trigger still fires once.
pub(crate) fn next_fire_time(
    schedule: &TriggerSchedule,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SchedulerError> {
    match schedule {
        TriggerSchedule::Once { at } => Ok(Some(*at)),
        TriggerSchedule::Cron {
            expression,
            time_zone,
        } => {
            let cron = parse_pattern(expression)?;
            let offset = parse_time_zone(time_zone.as_deref())?;
            let next = cron
                .find_next_occurrence(&after.with_timezone(&offset), false)
                .map_err(|e| SchedulerError::InvalidSchedule {
                    expression: expression.clone(),
                    reason: e.to_string(),
                })?;
            Ok(Some(next.with_timezone(&Utc)))
        }
    }
}
