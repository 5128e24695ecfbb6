// libs/scheduling-cell/src/store/mod.rs
//
// Transactional contract the scheduler requires from its storage
// collaborator. The scheduler only ever talks to this trait; `memory`
// provides the reference implementation used in tests and single-process
// deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Appointment, Provider, TimeSlot};

pub use crate::error::StoreError;

pub mod memory;

/// Opaque transaction handle. Implementations key their internal state by
/// `id`; dropping a handle without commit or rollback leaves the transaction
/// open until the implementation reaps it.
#[derive(Debug)]
pub struct TxHandle {
    pub(crate) id: Uuid,
}

impl TxHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Durable calendar storage with the isolation the scheduler depends on:
/// `lock_and_fetch_appointments` must take a write-blocking lock covering at
/// least the fetched provider range for the rest of the transaction, and
/// writes must become visible only at `commit`.
#[async_trait]
pub trait CalendarStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<TxHandle, StoreError>;

    /// Fetch every appointment for the provider intersecting `range`,
    /// ordered by start time, holding a write-intent lock that blocks
    /// concurrent conflicting writers until the transaction ends.
    async fn lock_and_fetch_appointments(
        &self,
        tx: &mut TxHandle,
        provider_id: Uuid,
        range: TimeSlot,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Read-only rule/exception fetch. No lock: administrative data changes
    /// rarely and acceptable staleness is a clinic policy decision.
    async fn fetch_provider(&self, provider_id: Uuid) -> Result<Provider, StoreError>;

    /// Read an appointment through the transaction (staged writes included).
    async fn fetch_appointment(
        &self,
        tx: &mut TxHandle,
        appointment_id: Uuid,
    ) -> Result<Appointment, StoreError>;

    async fn insert_appointment(
        &self,
        tx: &mut TxHandle,
        appointment: &Appointment,
    ) -> Result<(), StoreError>;

    /// Stage an update, failing with `VersionConflict` when the stored
    /// version no longer matches `expected_version`.
    async fn update_appointment(
        &self,
        tx: &mut TxHandle,
        appointment: &Appointment,
        expected_version: i64,
    ) -> Result<(), StoreError>;

    /// Look up a committed booking recorded under `key` no earlier than
    /// `since`.
    async fn find_idempotent(
        &self,
        key: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Record the idempotency key atomically with the booking it protects.
    async fn record_idempotent(
        &self,
        tx: &mut TxHandle,
        key: Uuid,
        appointment_id: Uuid,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn commit(&self, tx: TxHandle) -> Result<(), StoreError>;

    async fn rollback(&self, tx: TxHandle) -> Result<(), StoreError>;
}
