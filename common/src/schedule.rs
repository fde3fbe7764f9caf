// Cron schedule evaluation for connector timers

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// A connector cron expression parsed for evaluation in a fixed timezone
#[derive(Debug, Clone)]
pub struct ConnectorSchedule {
    expression: String,
    schedule: CronSchedule,
    timezone: Tz,
}

impl ConnectorSchedule {
    /// Parse a five- or six-field cron expression
    pub fn parse(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        let schedule = parse_cron_expression(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Next firing strictly after `reference`, evaluated in the schedule's timezone
    pub fn next_after(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let reference_in_tz = reference.with_timezone(&self.timezone);

        self.schedule
            .after(&reference_in_tz)
            .next()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| ScheduleError::NoNextExecution(self.expression.clone()))
    }
}

/// Parse and validate a cron expression
///
/// Accepts the conventional five-field form (minute precision) as well as the
/// six-field form with a leading seconds field. Day-of-week numbers follow the
/// conventional 0-7 numbering where both 0 and 7 mean Sunday.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized = normalize_cron_expression(expression)?;
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Rewrite a conventional cron expression into the seconds-first form
/// understood by the `cron` crate
pub fn normalize_cron_expression(expression: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    let mut fields: Vec<String> = match fields.len() {
        5 => std::iter::once("0")
            .chain(fields.iter().copied())
            .map(str::to_string)
            .collect(),
        6 => fields.iter().map(|f| f.to_string()).collect(),
        n => {
            return Err(ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 or 6 fields, found {}", n),
            })
        }
    };

    fields[5] = translate_day_of_week(&fields[5]);
    Ok(fields.join(" "))
}

// cron crate numbers weekdays 1-7 starting at Sunday
fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = match range.split_once('-') {
                // a range ending on Sunday (7) would wrap past Saturday
                Some((start, "7")) if step.is_none() => match start.parse::<u32>() {
                    Ok(0) => "1-7".to_string(),
                    Ok(n) if n < 7 => format!("{}-7,1", n + 1),
                    _ => range.to_string(),
                },
                _ => range
                    .split('-')
                    .map(|part| match part.parse::<u32>() {
                        Ok(n) if n <= 7 => ((n % 7) + 1).to_string(),
                        _ => part.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("-"),
            };
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Default timezone for connector schedules
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}
