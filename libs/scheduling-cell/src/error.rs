// libs/scheduling-cell/src/error.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AppointmentStatus;

/// Rejection reasons returned as explicit values from every facade
/// operation. Callers are expected to match exhaustively; nothing in this
/// enum is fatal to the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum SchedulingError {
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("provider cannot book an appointment with itself")]
    SelfBooking,

    #[error("requested time is outside the provider's availability")]
    OutsideAvailability,

    #[error("slot conflicts with existing appointment {existing_id}")]
    SlotConflict { existing_id: Uuid },

    #[error("stale version: expected {expected}, current is {current}")]
    StaleVersion { expected: i64, current: i64 },

    #[error("transition from {from} to {to} is not allowed")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("appointment is already finalized as {0}")]
    AlreadyFinalized(AppointmentStatus),

    #[error("scheduler busy acquiring the calendar lock, retry after backoff")]
    Busy,

    #[error("appointment not found")]
    NotFound,

    #[error("provider not found")]
    ProviderNotFound,

    #[error("calendar store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for SchedulingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout => SchedulingError::Busy,
            StoreError::AppointmentNotFound => SchedulingError::NotFound,
            StoreError::ProviderNotFound => SchedulingError::ProviderNotFound,
            StoreError::VersionConflict { expected, current } => {
                SchedulingError::StaleVersion { expected, current }
            }
            StoreError::TransactionClosed => {
                SchedulingError::StoreUnavailable("transaction already closed".to_string())
            }
            StoreError::Unavailable(msg) => SchedulingError::StoreUnavailable(msg),
        }
    }
}

/// Failures surfaced by the `CalendarStore` collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("timed out waiting for the provider write-intent lock")]
    LockTimeout,

    #[error("appointment not found")]
    AppointmentNotFound,

    #[error("provider not found")]
    ProviderNotFound,

    #[error("version conflict: expected {expected}, current is {current}")]
    VersionConflict { expected: i64, current: i64 },

    #[error("transaction is no longer open")]
    TransactionClosed,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
