// libs/scheduling-cell/src/services/conflict.rs
use chrono::{DateTime, Duration, Utc};
use shared_config::SchedulerConfig;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AvailabilityWindow, ConflictResult, TimeSlot};

/// The correctness engine: decides whether a proposed interval may occupy a
/// provider's calendar. Pure with respect to storage; the caller passes the
/// resolved windows and the appointment snapshot it fetched under its
/// transaction's write-intent lock, so the verdict holds until that
/// transaction commits.
pub struct ConflictChecker {
    config: SchedulerConfig,
}

impl ConflictChecker {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Basic interval invariants, checkable before touching the store.
    pub fn validate_interval(&self, slot: &TimeSlot) -> Result<(), String> {
        let minutes = slot.duration().num_minutes();
        if slot.end <= slot.start {
            return Err("interval must have positive duration".to_string());
        }
        if slot.duration() < Duration::minutes(self.config.min_appointment_minutes) {
            return Err(format!(
                "duration of {} minutes is below the {} minute minimum",
                minutes, self.config.min_appointment_minutes
            ));
        }
        if slot.duration() > Duration::minutes(self.config.max_appointment_minutes) {
            return Err(format!(
                "duration of {} minutes exceeds the {} minute maximum",
                minutes, self.config.max_appointment_minutes
            ));
        }
        Ok(())
    }

    /// Validate `requested` against the resolved windows and the locked
    /// snapshot of existing appointments. `exclude` supports rescheduling in
    /// place: the moved appointment is checked against everything but
    /// itself.
    pub fn check(
        &self,
        windows: &[AvailabilityWindow],
        requested: &TimeSlot,
        existing: &[Appointment],
        exclude: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ConflictResult {
        if let Err(reason) = self.validate_interval(requested) {
            return ConflictResult::InvalidInterval(reason);
        }

        // Containment in a single merged window; partial coverage is a
        // rejection, not a partial acceptance.
        if !windows.iter().any(|w| w.contains(requested)) {
            debug!("interval {} is outside availability", requested);
            return ConflictResult::OutsideAvailability;
        }

        for appointment in existing {
            if Some(appointment.id) == exclude {
                continue;
            }
            if !appointment.blocks_slot(
                self.config.block_completed_slots,
                self.config.tentative_hold_minutes,
                now,
            ) {
                continue;
            }
            if appointment.slot().overlaps(requested) {
                warn!(
                    "interval {} overlaps appointment {} ({})",
                    requested, appointment.id, appointment.status
                );
                return ConflictResult::OverlapsAppointment(appointment.id);
            }
        }

        ConflictResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 7, h, m, 0).unwrap()
    }

    fn slot(sh: u32, sm: u32, eh: u32, em: u32) -> TimeSlot {
        TimeSlot::new(at(sh, sm), at(eh, em))
    }

    fn appt(s: TimeSlot, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            start_time: s.start,
            end_time: s.end,
            status,
            version: 1,
            created_at: at(0, 0),
            updated_at: at(0, 0),
        }
    }

    fn checker() -> ConflictChecker {
        ConflictChecker::new(SchedulerConfig::default())
    }

    #[test]
    fn contained_interval_with_no_overlap_is_ok() {
        let windows = vec![slot(9, 0, 12, 0)];
        let result = checker().check(&windows, &slot(9, 0, 9, 30), &[], None, at(8, 0));
        assert_eq!(result, ConflictResult::Ok);
    }

    #[test]
    fn interval_spanning_a_gap_is_outside_availability() {
        let windows = vec![slot(9, 0, 10, 0), slot(10, 30, 12, 0)];
        let result = checker().check(&windows, &slot(9, 30, 10, 15), &[], None, at(8, 0));
        assert_eq!(result, ConflictResult::OutsideAvailability);
    }

    #[test]
    fn overlap_with_active_appointment_is_a_conflict() {
        let windows = vec![slot(9, 0, 12, 0)];
        let existing = appt(slot(9, 0, 9, 30), AppointmentStatus::Confirmed);
        let id = existing.id;
        let result = checker().check(&windows, &slot(9, 15, 9, 45), &[existing], None, at(8, 0));
        assert_eq!(result, ConflictResult::OverlapsAppointment(id));
    }

    #[test]
    fn cancelled_appointment_does_not_block() {
        let windows = vec![slot(9, 0, 12, 0)];
        let existing = appt(slot(9, 0, 9, 30), AppointmentStatus::Cancelled);
        let result = checker().check(&windows, &slot(9, 15, 9, 45), &[existing], None, at(8, 0));
        assert_eq!(result, ConflictResult::Ok);
    }

    #[test]
    fn completed_blocks_only_when_configured() {
        let windows = vec![slot(9, 0, 12, 0)];
        let existing = appt(slot(9, 0, 9, 30), AppointmentStatus::Completed);
        let id = existing.id;

        let open = checker().check(
            &windows,
            &slot(9, 0, 9, 30),
            std::slice::from_ref(&existing),
            None,
            at(13, 0),
        );
        assert_eq!(open, ConflictResult::Ok);

        let strict = ConflictChecker::new(SchedulerConfig {
            block_completed_slots: true,
            ..SchedulerConfig::default()
        });
        let blocked = strict.check(&windows, &slot(9, 0, 9, 30), &[existing], None, at(13, 0));
        assert_eq!(blocked, ConflictResult::OverlapsAppointment(id));
    }

    #[test]
    fn expired_tentative_hold_stops_blocking() {
        let windows = vec![slot(9, 0, 12, 0)];
        let mut existing = appt(slot(10, 0, 10, 30), AppointmentStatus::Tentative);
        existing.created_at = at(7, 0);

        // Default hold is 30 minutes; by 08:00 the 07:00 hold has lapsed.
        let result = checker().check(&windows, &slot(10, 0, 10, 30), &[existing], None, at(8, 0));
        assert_eq!(result, ConflictResult::Ok);
    }

    #[test]
    fn excluded_appointment_is_ignored() {
        let windows = vec![slot(9, 0, 12, 0)];
        let existing = appt(slot(9, 0, 9, 30), AppointmentStatus::Confirmed);
        let id = existing.id;
        let result = checker().check(
            &windows,
            &slot(9, 0, 9, 45),
            &[existing],
            Some(id),
            at(8, 0),
        );
        assert_eq!(result, ConflictResult::Ok);
    }

    #[test]
    fn duration_bounds_are_enforced() {
        let windows = vec![slot(9, 0, 12, 0)];
        let too_short = checker().check(&windows, &slot(9, 0, 9, 5), &[], None, at(8, 0));
        assert!(matches!(too_short, ConflictResult::InvalidInterval(_)));

        let too_long = checker().check(&windows, &slot(9, 0, 11, 30), &[], None, at(8, 0));
        assert!(matches!(too_long, ConflictResult::InvalidInterval(_)));
    }
}
