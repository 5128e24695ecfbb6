// libs/scheduling-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::SchedulingError;
use crate::models::{Appointment, AppointmentStatus};

/// Finite-state machine governing an appointment's lifecycle. Illegal
/// transitions are rejected from one exhaustive table instead of ad hoc
/// status checks scattered across call sites; temporal guards bind
/// transitions to the appointment's scheduled interval.
pub struct BookingStateMachine;

impl BookingStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Statuses reachable from `current`, ignoring temporal guards.
    pub fn valid_transitions(&self, current: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current {
            AppointmentStatus::Tentative => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => &[
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            // Terminal states never transition.
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => &[],
        }
    }

    /// Validate `target` against the table and the temporal guards:
    /// confirmation only before the start, completion only at or after the
    /// start, no-show only after the end has passed.
    pub fn validate(
        &self,
        appointment: &Appointment,
        target: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        let current = appointment.status;
        debug!(
            "validating transition {} -> {} for appointment {}",
            current, target, appointment.id
        );

        if current.is_terminal() {
            warn!(
                "appointment {} is already finalized as {}",
                appointment.id, current
            );
            return Err(SchedulingError::AlreadyFinalized(current));
        }

        if !self.valid_transitions(current).contains(&target) {
            return Err(SchedulingError::InvalidTransition {
                from: current,
                to: target,
            });
        }

        let guard_ok = match target {
            AppointmentStatus::Confirmed => now < appointment.start_time,
            AppointmentStatus::Completed => now >= appointment.start_time,
            AppointmentStatus::NoShow => now > appointment.end_time,
            AppointmentStatus::Cancelled => true,
            AppointmentStatus::Tentative => false, // unreachable via the table
        };

        if !guard_ok {
            return Err(SchedulingError::InvalidTransition {
                from: current,
                to: target,
            });
        }

        Ok(())
    }
}

impl Default for BookingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn appt(status: AppointmentStatus, start: DateTime<Utc>, end: DateTime<Utc>) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            start_time: start,
            end_time: end,
            status,
            version: 1,
            created_at: start - Duration::days(1),
            updated_at: start - Duration::days(1),
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 7, h, 0, 0).unwrap()
    }

    #[test]
    fn tentative_confirms_before_start() {
        let sm = BookingStateMachine::new();
        let a = appt(AppointmentStatus::Tentative, at(10), at(11));
        sm.validate(&a, AppointmentStatus::Confirmed, at(9)).unwrap();
    }

    #[test]
    fn confirmation_after_start_is_rejected() {
        let sm = BookingStateMachine::new();
        let a = appt(AppointmentStatus::Tentative, at(10), at(11));
        let err = sm
            .validate(&a, AppointmentStatus::Confirmed, at(10))
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidTransition { .. }));
    }

    #[test]
    fn completion_requires_the_start_to_have_passed() {
        let sm = BookingStateMachine::new();
        let a = appt(AppointmentStatus::Confirmed, at(10), at(11));
        assert!(sm.validate(&a, AppointmentStatus::Completed, at(9)).is_err());
        sm.validate(&a, AppointmentStatus::Completed, at(10)).unwrap();
    }

    #[test]
    fn no_show_requires_the_end_to_have_passed() {
        let sm = BookingStateMachine::new();
        let a = appt(AppointmentStatus::Confirmed, at(10), at(11));
        assert!(sm.validate(&a, AppointmentStatus::NoShow, at(11)).is_err());
        sm.validate(&a, AppointmentStatus::NoShow, at(12)).unwrap();

        let tentative = appt(AppointmentStatus::Tentative, at(10), at(11));
        sm.validate(&tentative, AppointmentStatus::NoShow, at(12))
            .unwrap();
    }

    #[test]
    fn cancellation_is_allowed_any_time() {
        let sm = BookingStateMachine::new();
        for status in [AppointmentStatus::Tentative, AppointmentStatus::Confirmed] {
            let a = appt(status, at(10), at(11));
            sm.validate(&a, AppointmentStatus::Cancelled, at(9)).unwrap();
            sm.validate(&a, AppointmentStatus::Cancelled, at(12)).unwrap();
        }
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        let sm = BookingStateMachine::new();
        let terminals = [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ];
        let targets = [
            AppointmentStatus::Tentative,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ];
        for from in terminals {
            assert!(sm.valid_transitions(from).is_empty());
            for to in targets {
                let a = appt(from, at(10), at(11));
                let err = sm.validate(&a, to, at(12)).unwrap_err();
                assert_eq!(err, SchedulingError::AlreadyFinalized(from));
            }
        }
    }

    #[test]
    fn tentative_cannot_jump_straight_to_completed() {
        let sm = BookingStateMachine::new();
        let a = appt(AppointmentStatus::Tentative, at(10), at(11));
        let err = sm
            .validate(&a, AppointmentStatus::Completed, at(12))
            .unwrap_err();
        assert_eq!(
            err,
            SchedulingError::InvalidTransition {
                from: AppointmentStatus::Tentative,
                to: AppointmentStatus::Completed,
            }
        );
    }
}
