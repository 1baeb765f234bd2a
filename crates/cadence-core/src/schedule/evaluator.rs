//! ScheduleEvaluator - cron 式 / エイリアスの評価
//!
//! 入力は標準の 5 フィールド（分 時 日 月 曜日）。
//! `cron` crate は秒付き・曜日 1-7（日曜 = 1）なので、評価前に変換する。
//! 判定は分単位: 同じ分の中ならどの時刻で評価しても結果は同じ。
//!
//! 日 と 曜日 が両方とも制限されている場合は OR で評価する
//! (`0 9 1 * 1` は毎月 1 日と毎週月曜)。`cron` crate は AND なので
//! 曜日を `*` にしたものと日を `*` にしたものの 2 本に分けて持つ。

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use cron::Schedule;

use super::alias::AliasTable;
use crate::domain::errors::ScheduleError;
use crate::domain::ComputedSchedule;

#[derive(Debug, Clone, Default)]
pub struct ScheduleEvaluator {
    aliases: AliasTable,
}

impl ScheduleEvaluator {
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn parse(&self, expression: &str) -> Result<CronSchedule, ScheduleError> {
        let resolved = self.aliases.resolve(expression);
        let invalid = |reason: String| ScheduleError::Invalid {
            expression: expression.to_string(),
            reason,
        };
        let variants = to_cron_crate_syntax(resolved)
            .map_err(invalid)?
            .iter()
            .map(|converted| Schedule::from_str(converted).map_err(|e| invalid(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CronSchedule { variants })
    }

    pub fn is_due(&self, expression: &str, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
        Ok(self.parse(expression)?.is_due(now))
    }

    pub fn next_run_after(
        &self,
        expression: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        Ok(self.parse(expression)?.next_after(now))
    }

    pub fn evaluate(&self, expression: &str, now: DateTime<Utc>) -> Result<ComputedSchedule, ScheduleError> {
        let schedule = self.parse(expression)?;
        Ok(ComputedSchedule {
            is_due: schedule.is_due(now),
            next_run_at: schedule.next_after(now),
        })
    }
}

/// A parsed expression. Holds two `cron` schedules when day-of-month and
/// day-of-week are both restricted; a minute matches if either one does.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    variants: Vec<Schedule>,
}

impl CronSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.variants.iter().any(|schedule| due_at(schedule, now))
    }

    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.variants
            .iter()
            .filter_map(|schedule| schedule.after(&now).next())
            .min()
    }
}

/// Start of the minute containing `now`.
pub fn minute_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::minutes(1)).unwrap_or(now)
}

fn due_at(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let minute = minute_floor(now);
    schedule.after(&(minute - Duration::seconds(1))).next() == Some(minute)
}

/// `m h dom mon dow` → `0 m h dom mon dow'`
///
/// Splits into two schedules when day-of-month and day-of-week are both restricted.
fn to_cron_crate_syntax(expression: &str) -> Result<Vec<String>, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return Err(format!("expected 5 fields, got {}", fields.len()));
    };
    let translated = translate_day_of_week(dow)?;

    if is_restricted(dom) && is_restricted(dow) {
        Ok(vec![
            format!("0 {minute} {hour} {dom} {month} *"),
            format!("0 {minute} {hour} * {month} {translated}"),
        ])
    } else {
        Ok(vec![format!("0 {minute} {hour} {dom} {month} {translated}")])
    }
}

/// A field starting with `*` (including `*/2`) counts as unrestricted.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

/// Numeric days use 0-7 with Sunday as 0 or 7; the cron crate wants 1-7 with
/// Sunday as 1. Numeric fields are expanded to an explicit list, names and
/// bare `*` / `?` are left alone.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if !field.chars().any(|c| c.is_ascii_digit()) {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(parse_day_number(step)?)),
            None => (item, None),
        };
        if step == Some(0) {
            return Err(format!("zero step in day-of-week '{field}'"));
        }
        let (start, end) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_day_number(a)?, parse_day_number(b)?),
                None => {
                    let a = parse_day_number(range)?;
                    (a, if step.is_some() { 6 } else { a })
                }
            },
        };
        if start > 7 || end > 7 || start > end {
            return Err(format!("day-of-week out of range in '{field}'"));
        }
        for day in (start..=end).step_by(step.unwrap_or(1) as usize) {
            days.insert(day % 7);
        }
    }

    Ok(days
        .into_iter()
        .map(|d| (d + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_day_number(raw: &str) -> Result<u32, String> {
    raw.parse::<u32>()
        .map_err(|_| format!("unsupported day-of-week token '{raw}'"))
}
