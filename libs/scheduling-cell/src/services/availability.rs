// libs/scheduling-cell/src/services/availability.rs
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike};
use tracing::{debug, warn};

use crate::error::SchedulingError;
use crate::models::{
    AvailabilityException, AvailabilityWindow, Provider, RecurringRule, RulePolicy, TimeSlot,
};

/// Computes the bookable windows for a provider over a date range by
/// expanding recurring weekly rules and then subtracting one-off exceptions.
/// Pure interval algebra: no storage access, so it is testable in isolation
/// and always runs against whatever snapshot the caller fetched.
pub struct AvailabilityResolver {
    policy: RulePolicy,
}

impl AvailabilityResolver {
    pub fn new(policy: RulePolicy) -> Self {
        Self { policy }
    }

    /// Validate a rule set at configuration time. Rules that cross midnight
    /// or overlap another rule on the same weekday never reach the resolver.
    pub fn validate_rules(&self, rules: &[RecurringRule]) -> Result<(), SchedulingError> {
        for rule in rules {
            if rule.start_time >= rule.end_time {
                return Err(SchedulingError::InvalidInterval(format!(
                    "rule on {:?} must start before it ends within the same day",
                    rule.weekday
                )));
            }
            if self.policy.enforce_quarter_hour
                && (!on_quarter_hour(rule.start_time) || !on_quarter_hour(rule.end_time))
            {
                return Err(SchedulingError::InvalidInterval(format!(
                    "rule on {:?} must use 15-minute increments",
                    rule.weekday
                )));
            }
            if let (Some(from), Some(until)) = (rule.effective_from, rule.effective_until) {
                if from > until {
                    return Err(SchedulingError::InvalidInterval(format!(
                        "rule on {:?} has an effective range ending before it starts",
                        rule.weekday
                    )));
                }
            }
        }

        for (i, a) in rules.iter().enumerate() {
            for b in rules.iter().skip(i + 1) {
                if a.weekday == b.weekday
                    && effective_ranges_intersect(a, b)
                    && a.start_time < b.end_time
                    && b.start_time < a.end_time
                {
                    return Err(SchedulingError::InvalidInterval(format!(
                        "overlapping rules on {:?}",
                        a.weekday
                    )));
                }
            }
        }

        if let Some(cap) = self.policy.max_daily_minutes {
            for rule in rules {
                let daily: i64 = rules
                    .iter()
                    .filter(|r| r.weekday == rule.weekday)
                    .map(|r| (r.end_time - r.start_time).num_minutes())
                    .sum();
                if daily > cap {
                    return Err(SchedulingError::InvalidInterval(format!(
                        "scheduled time on {:?} exceeds the {} minute daily cap",
                        rule.weekday, cap
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate one-off exceptions at configuration time. Partial windows
    /// must cover at least one instant; whole-day blocks carry no window to
    /// check.
    pub fn validate_exceptions(
        &self,
        exceptions: &[AvailabilityException],
    ) -> Result<(), SchedulingError> {
        for exception in exceptions {
            if let Some((start, end)) = exception.window {
                if start >= end {
                    return Err(SchedulingError::InvalidInterval(format!(
                        "exception on {} must start before it ends",
                        exception.date
                    )));
                }
            }
        }
        Ok(())
    }

    /// Bookable windows for each date in `[from, until]`, chronological,
    /// half-open, UTC. A fully blocked date simply contributes no windows.
    pub fn resolve(
        &self,
        provider: &Provider,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Vec<AvailabilityWindow> {
        let mut windows = Vec::new();
        let mut date = from;
        while date <= until {
            windows.extend(self.windows_for_date(provider, date));
            date += Duration::days(1);
        }
        debug!(
            "resolved {} windows for provider {} between {} and {}",
            windows.len(),
            provider.id,
            from,
            until
        );
        windows
    }

    fn windows_for_date(&self, provider: &Provider, date: NaiveDate) -> Vec<AvailabilityWindow> {
        let weekday = date.weekday();
        let mut base: Vec<TimeSlot> = provider
            .rules
            .iter()
            .filter(|rule| rule.applies_on(date, weekday))
            .map(|rule| {
                TimeSlot::new(
                    date.and_time(rule.start_time).and_utc(),
                    date.and_time(rule.end_time).and_utc(),
                )
            })
            .collect();

        base = merge_windows(base);

        // Exceptions take precedence over recurring rules for their date.
        // A degenerate partial window (start >= end) covers no instant and
        // blocks nothing; subtracting it would split or duplicate windows.
        for exception in provider.exceptions.iter().filter(|e| e.date == date) {
            match exception.window {
                None => return Vec::new(),
                Some((block_start, block_end)) if block_start < block_end => {
                    let block = TimeSlot::new(
                        date.and_time(block_start).and_utc(),
                        date.and_time(block_end).and_utc(),
                    );
                    base = subtract_window(base, &block);
                }
                Some((block_start, block_end)) => {
                    warn!(
                        "ignoring degenerate exception window {}..{} on {}",
                        block_start, block_end, date
                    );
                }
            }
        }

        base
    }
}

impl Default for AvailabilityResolver {
    fn default() -> Self {
        Self::new(RulePolicy::default())
    }
}

/// Union of possibly overlapping or adjacent windows, sorted by start.
fn merge_windows(mut windows: Vec<TimeSlot>) -> Vec<TimeSlot> {
    if windows.is_empty() {
        return windows;
    }
    windows.sort_by_key(|w| w.start);

    let mut merged: Vec<TimeSlot> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => {
                if window.end > last.end {
                    last.end = window.end;
                }
            }
            _ => merged.push(window),
        }
    }
    merged
}

/// Set-difference of `block` from each window, possibly splitting a window
/// in two. Input order is preserved.
fn subtract_window(windows: Vec<TimeSlot>, block: &TimeSlot) -> Vec<TimeSlot> {
    let mut out = Vec::with_capacity(windows.len() + 1);
    for window in windows {
        if !window.overlaps(block) {
            out.push(window);
            continue;
        }
        if window.start < block.start {
            out.push(TimeSlot::new(window.start, block.start));
        }
        if block.end < window.end {
            out.push(TimeSlot::new(block.end, window.end));
        }
    }
    out
}

fn on_quarter_hour(t: NaiveTime) -> bool {
    t.minute() % 15 == 0 && t.second() == 0 && t.nanosecond() == 0
}

fn effective_ranges_intersect(a: &RecurringRule, b: &RecurringRule) -> bool {
    let a_from = a.effective_from.unwrap_or(NaiveDate::MIN);
    let a_until = a.effective_until.unwrap_or(NaiveDate::MAX);
    let b_from = b.effective_from.unwrap_or(NaiveDate::MIN);
    let b_until = b.effective_until.unwrap_or(NaiveDate::MAX);
    a_from <= b_until && b_from <= a_until
}
