// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// TIME PRIMITIVES
// ==============================================================================

/// Half-open interval `[start, end)` in UTC.
///
/// Half-open boundaries let back-to-back slots share an instant without
/// counting as an overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// `[a,b)` and `[c,d)` intersect iff `a < d && c < b`.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeSlot) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Calendar date of the starting instant.
    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Calendar date of the last instant inside the interval. For a slot
    /// ending exactly at midnight this is still the previous day, matching
    /// the half-open convention.
    pub fn end_date(&self) -> NaiveDate {
        (self.end - Duration::nanoseconds(1)).date_naive()
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// A bookable window produced by the availability resolver.
pub type AvailabilityWindow = TimeSlot;

// ==============================================================================
// PROVIDER AVAILABILITY MODELS
// ==============================================================================

/// A schedulable entity: doctor, room, or piece of equipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub display_name: String,
    pub timezone: String,
    pub rules: Vec<RecurringRule>,
    pub exceptions: Vec<AvailabilityException>,
}

/// Weekly working-hours pattern for a provider.
///
/// Times are within a single day; rules crossing midnight are rejected at
/// validation time so per-date window expansion never has to stitch days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringRule {
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
}

impl RecurringRule {
    pub fn applies_on(&self, date: NaiveDate, weekday: Weekday) -> bool {
        if self.weekday != weekday {
            return false;
        }
        if let Some(from) = self.effective_from {
            if date < from {
                return false;
            }
        }
        if let Some(until) = self.effective_until {
            if date > until {
                return false;
            }
        }
        true
    }
}

/// One-off override for a specific date. `window: None` blocks the whole day;
/// a partial window is subtracted from that day's recurring windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub date: NaiveDate,
    pub window: Option<(NaiveTime, NaiveTime)>,
    pub reason: ExceptionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionReason {
    Holiday,
    Leave,
    ManualBlock,
}

impl fmt::Display for ExceptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionReason::Holiday => write!(f, "holiday"),
            ExceptionReason::Leave => write!(f, "leave"),
            ExceptionReason::ManualBlock => write!(f, "manual_block"),
        }
    }
}

/// Validation policy for recurring rules. The quarter-hour grid comes from
/// the clinic's booking form, which only offers 15-minute increments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePolicy {
    pub enforce_quarter_hour: bool,
    /// Cap on the total scheduled minutes per weekday, when set.
    pub max_daily_minutes: Option<i64>,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            enforce_quarter_hour: true,
            max_daily_minutes: None,
        }
    }
}

// ==============================================================================
// APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    /// Optimistic-concurrency counter, bumped on every committed mutation.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }

    /// Whether an unconfirmed hold has outlived its reservation window.
    pub fn is_expired_hold(&self, hold_minutes: i64, now: DateTime<Utc>) -> bool {
        self.status == AppointmentStatus::Tentative
            && hold_minutes > 0
            && self.created_at + Duration::minutes(hold_minutes) <= now
    }

    /// Whether this appointment still occupies its slot for conflict checks.
    pub fn blocks_slot(
        &self,
        block_completed: bool,
        hold_minutes: i64,
        now: DateTime<Utc>,
    ) -> bool {
        match self.status {
            AppointmentStatus::Tentative => !self.is_expired_hold(hold_minutes, now),
            AppointmentStatus::Confirmed => true,
            AppointmentStatus::Completed => block_completed,
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Tentative,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::Cancelled
                | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Tentative => write!(f, "tentative"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

// ==============================================================================
// REQUEST / RESULT MODELS
// ==============================================================================

/// Transient booking input consumed by the scheduler facade; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub provider_id: Uuid,
    pub patient_id: Uuid,
    pub slot: TimeSlot,
    /// Deduplicates retried network calls: a repeated key within the
    /// configured window returns the original appointment.
    pub idempotency_key: Uuid,
}

/// Outcome of a conflict check against a locked store snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResult {
    Ok,
    /// Interval is not fully contained in a single resolved window. Partial
    /// overlap with availability is a conflict, not a partial acceptance.
    OutsideAvailability,
    OverlapsAppointment(Uuid),
    InvalidInterval(String),
}
