// libs/scheduling-cell/src/services/scheduler.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use shared_config::SchedulerConfig;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{
    Appointment, AppointmentStatus, AvailabilityWindow, BookingRequest, ConflictResult, Provider,
    RulePolicy, TimeSlot,
};
use crate::services::availability::AvailabilityResolver;
use crate::services::conflict::ConflictChecker;
use crate::services::lifecycle::BookingStateMachine;
use crate::store::{CalendarStore, TxHandle};

/// Public entry point of the scheduling core. Every mutating operation runs
/// the propose/validate/commit-or-reject protocol inside one store
/// transaction: lock a conservative day superset of the provider's calendar,
/// re-check against that snapshot, write, commit. A failed operation leaves
/// no partial state.
pub struct SchedulerService<S: CalendarStore> {
    store: Arc<S>,
    resolver: AvailabilityResolver,
    checker: ConflictChecker,
    lifecycle: BookingStateMachine,
    config: SchedulerConfig,
}

impl<S: CalendarStore> SchedulerService<S> {
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        Self {
            resolver: AvailabilityResolver::new(RulePolicy::default()),
            checker: ConflictChecker::new(config.clone()),
            lifecycle: BookingStateMachine::new(),
            store,
            config,
        }
    }

    pub fn with_rule_policy(store: Arc<S>, config: SchedulerConfig, policy: RulePolicy) -> Self {
        Self {
            resolver: AvailabilityResolver::new(policy),
            checker: ConflictChecker::new(config.clone()),
            lifecycle: BookingStateMachine::new(),
            store,
            config,
        }
    }

    /// Book a new appointment. Repeating a recent idempotency key returns
    /// the original appointment instead of creating a duplicate.
    #[instrument(skip(self, request), fields(provider_id = %request.provider_id))]
    pub async fn propose(&self, request: BookingRequest) -> Result<Appointment, SchedulingError> {
        self.checker
            .validate_interval(&request.slot)
            .map_err(SchedulingError::InvalidInterval)?;

        if request.patient_id == request.provider_id {
            return Err(SchedulingError::SelfBooking);
        }

        let now = Utc::now();
        let since = now - Duration::hours(self.config.idempotency_window_hours);
        if let Some(original) = self
            .store
            .find_idempotent(request.idempotency_key, since)
            .await?
        {
            info!(
                "idempotent replay of key {} returned appointment {}",
                request.idempotency_key, original.id
            );
            return Ok(original);
        }

        let provider = self.store.fetch_provider(request.provider_id).await?;

        let mut tx = self.store.begin().await?;
        match self.propose_in_tx(&mut tx, &provider, &request, now).await {
            Ok(appointment) => {
                self.store.commit(tx).await?;
                info!(
                    "appointment {} booked for provider {} at {}",
                    appointment.id, provider.id, appointment.start_time
                );
                Ok(appointment)
            }
            Err(err) => {
                let _ = self.store.rollback(tx).await;
                Err(err)
            }
        }
    }

    /// Move an existing appointment to `new_slot`, re-running the conflict
    /// check with the appointment excluded from its own snapshot.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        new_slot: TimeSlot,
        expected_version: i64,
    ) -> Result<Appointment, SchedulingError> {
        self.checker
            .validate_interval(&new_slot)
            .map_err(SchedulingError::InvalidInterval)?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        match self
            .reschedule_in_tx(&mut tx, appointment_id, new_slot, expected_version, now)
            .await
        {
            Ok(appointment) => {
                self.store.commit(tx).await?;
                info!(
                    "appointment {} rescheduled to {}",
                    appointment.id, appointment.start_time
                );
                Ok(appointment)
            }
            Err(err) => {
                let _ = self.store.rollback(tx).await;
                Err(err)
            }
        }
    }

    /// Apply a lifecycle transition through the state machine.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        target: AppointmentStatus,
        expected_version: i64,
    ) -> Result<Appointment, SchedulingError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        match self
            .transition_in_tx(&mut tx, appointment_id, target, expected_version, now)
            .await
        {
            Ok(appointment) => {
                self.store.commit(tx).await?;
                info!(
                    "appointment {} transitioned to {}",
                    appointment.id, appointment.status
                );
                Ok(appointment)
            }
            Err(err) => {
                let _ = self.store.rollback(tx).await;
                Err(err)
            }
        }
    }

    /// Advisory read of a provider's bookable windows. Not guaranteed fresh
    /// beyond the moment of the call: a later `propose` may still lose a
    /// race, which callers handle by retrying.
    pub async fn list_availability(
        &self,
        provider_id: Uuid,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, SchedulingError> {
        let provider = self.store.fetch_provider(provider_id).await?;
        Ok(self.resolver.resolve(&provider, from, until))
    }

    /// Validate a provider's rules and exceptions against the active policy.
    /// Intended for administrative flows before a roster change is
    /// persisted.
    pub fn validate_provider_rules(&self, provider: &Provider) -> Result<(), SchedulingError> {
        self.resolver.validate_rules(&provider.rules)?;
        self.resolver.validate_exceptions(&provider.exceptions)
    }

    // ==========================================================================
    // PRIVATE TRANSACTION BODIES
    // ==========================================================================

    async fn propose_in_tx(
        &self,
        tx: &mut TxHandle,
        provider: &Provider,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        let lock_range = day_superset(&request.slot);
        let existing = self
            .store
            .lock_and_fetch_appointments(tx, provider.id, lock_range)
            .await?;

        // A racing retry carrying the same key may have committed while we
        // waited on the lock; the pre-transaction lookup cannot see it.
        let since = now - Duration::hours(self.config.idempotency_window_hours);
        if let Some(original) = self
            .store
            .find_idempotent(request.idempotency_key, since)
            .await?
        {
            info!(
                "idempotent replay of key {} resolved under lock to appointment {}",
                request.idempotency_key, original.id
            );
            return Ok(original);
        }

        self.expire_stale_holds(tx, &existing, now).await?;

        let windows =
            self.resolver
                .resolve(provider, request.slot.start_date(), request.slot.end_date());

        match self.checker.check(&windows, &request.slot, &existing, None, now) {
            ConflictResult::Ok => {}
            other => return Err(conflict_to_error(other)),
        }

        let status = if self.config.auto_confirm {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Tentative
        };

        let appointment = Appointment {
            id: Uuid::new_v4(),
            provider_id: provider.id,
            patient_id: request.patient_id,
            start_time: request.slot.start,
            end_time: request.slot.end,
            status,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_appointment(tx, &appointment).await?;
        self.store
            .record_idempotent(tx, request.idempotency_key, appointment.id, now)
            .await?;

        Ok(appointment)
    }

    async fn reschedule_in_tx(
        &self,
        tx: &mut TxHandle,
        appointment_id: Uuid,
        new_slot: TimeSlot,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.store.fetch_appointment(tx, appointment_id).await?;

        if current.status.is_terminal() {
            return Err(SchedulingError::AlreadyFinalized(current.status));
        }
        if current.version != expected_version {
            return Err(SchedulingError::StaleVersion {
                expected: expected_version,
                current: current.version,
            });
        }

        let provider = self.store.fetch_provider(current.provider_id).await?;

        // Lock a range covering both the old and the new interval so the
        // vacated slot and the target slot move atomically.
        let lock_range = day_superset(&envelope(&current.slot(), &new_slot));
        let existing = self
            .store
            .lock_and_fetch_appointments(tx, provider.id, lock_range)
            .await?;

        self.expire_stale_holds(tx, &existing, now).await?;

        let windows =
            self.resolver
                .resolve(&provider, new_slot.start_date(), new_slot.end_date());

        match self
            .checker
            .check(&windows, &new_slot, &existing, Some(appointment_id), now)
        {
            ConflictResult::Ok => {}
            other => return Err(conflict_to_error(other)),
        }

        let mut updated = current.clone();
        updated.start_time = new_slot.start;
        updated.end_time = new_slot.end;
        updated.version = expected_version + 1;
        updated.updated_at = now;

        self.store
            .update_appointment(tx, &updated, expected_version)
            .await?;
        Ok(updated)
    }

    async fn transition_in_tx(
        &self,
        tx: &mut TxHandle,
        appointment_id: Uuid,
        target: AppointmentStatus,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.store.fetch_appointment(tx, appointment_id).await?;

        if current.version != expected_version {
            return Err(SchedulingError::StaleVersion {
                expected: expected_version,
                current: current.version,
            });
        }

        self.lifecycle.validate(&current, target, now)?;

        let mut updated = current.clone();
        updated.status = target;
        updated.version = expected_version + 1;
        updated.updated_at = now;

        self.store
            .update_appointment(tx, &updated, expected_version)
            .await?;
        Ok(updated)
    }

    /// Lazily cancel tentative holds that outlived their reservation window.
    /// Runs against the locked snapshot, so an expired hold is released in
    /// the same transaction that books over it.
    async fn expire_stale_holds(
        &self,
        tx: &mut TxHandle,
        existing: &[Appointment],
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        for appointment in existing {
            if !appointment.is_expired_hold(self.config.tentative_hold_minutes, now) {
                continue;
            }
            debug!(
                "releasing expired tentative hold {} (created {})",
                appointment.id, appointment.created_at
            );
            let mut released = appointment.clone();
            released.status = AppointmentStatus::Cancelled;
            released.version = appointment.version + 1;
            released.updated_at = now;
            if let Err(err) = self
                .store
                .update_appointment(tx, &released, appointment.version)
                .await
            {
                // Another writer beat us to it; the hold no longer blocks
                // either way.
                warn!("failed to release expired hold {}: {}", appointment.id, err);
            }
        }
        Ok(())
    }
}

/// Conservative lock superset: the whole calendar days the slot touches.
fn day_superset(slot: &TimeSlot) -> TimeSlot {
    let start = slot.start_date().and_time(NaiveTime::MIN).and_utc();
    let end = (slot.end_date() + Duration::days(1))
        .and_time(NaiveTime::MIN)
        .and_utc();
    TimeSlot::new(start, end)
}

/// Smallest interval covering both slots.
fn envelope(a: &TimeSlot, b: &TimeSlot) -> TimeSlot {
    TimeSlot::new(a.start.min(b.start), a.end.max(b.end))
}

fn conflict_to_error(result: ConflictResult) -> SchedulingError {
    match result {
        ConflictResult::Ok => unreachable!("ok is handled by the caller"),
        ConflictResult::OutsideAvailability => SchedulingError::OutsideAvailability,
        ConflictResult::OverlapsAppointment(existing_id) => {
            SchedulingError::SlotConflict { existing_id }
        }
        ConflictResult::InvalidInterval(reason) => SchedulingError::InvalidInterval(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_superset_covers_whole_days() {
        let slot = TimeSlot::new(
            Utc.with_ymd_and_hms(2030, 1, 7, 9, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 7, 10, 0, 0).unwrap(),
        );
        let range = day_superset(&slot);
        assert_eq!(range.start, Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2030, 1, 8, 0, 0, 0).unwrap());
    }

    #[test]
    fn envelope_spans_disjoint_slots() {
        let a = TimeSlot::new(
            Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 7, 10, 0, 0).unwrap(),
        );
        let b = TimeSlot::new(
            Utc.with_ymd_and_hms(2030, 1, 9, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 9, 15, 0, 0).unwrap(),
        );
        let e = envelope(&a, &b);
        assert_eq!(e.start, a.start);
        assert_eq!(e.end, b.end);
    }
}
