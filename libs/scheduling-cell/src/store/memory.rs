// libs/scheduling-cell/src/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_config::SchedulerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Appointment, Provider, TimeSlot};
use crate::store::{CalendarStore, TxHandle};

/// In-memory `CalendarStore` with real transactional behavior: writes are
/// staged per transaction and applied atomically on commit, and each
/// provider has a write-intent mutex that serializes conflicting bookers.
/// Lock acquisition is bounded by `lock_wait`, surfacing `LockTimeout` so
/// the facade can answer `Busy` instead of stalling.
pub struct MemoryCalendarStore {
    state: RwLock<StoreState>,
    provider_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    transactions: Mutex<HashMap<Uuid, TxState>>,
    lock_wait: Duration,
}

#[derive(Default)]
struct StoreState {
    providers: HashMap<Uuid, Provider>,
    appointments: HashMap<Uuid, Appointment>,
    idempotency: HashMap<Uuid, IdempotencyRecord>,
}

#[derive(Clone)]
struct IdempotencyRecord {
    appointment_id: Uuid,
    recorded_at: DateTime<Utc>,
}

struct TxState {
    guards: HashMap<Uuid, OwnedMutexGuard<()>>,
    staged: Vec<StagedWrite>,
}

enum StagedWrite {
    Upsert(Appointment),
    Idempotency {
        key: Uuid,
        appointment_id: Uuid,
        recorded_at: DateTime<Utc>,
    },
}

impl MemoryCalendarStore {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            provider_locks: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            lock_wait,
        }
    }

    /// Build a store whose lock-wait bound comes from the shared scheduler
    /// configuration, so the facade and the store cannot disagree on it.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(Duration::from_millis(config.lock_wait_timeout_ms))
    }

    /// Seed or replace a provider's roster entry. Administrative mutation,
    /// outside the scheduler's transactional protocol.
    pub async fn upsert_provider(&self, provider: Provider) {
        let mut state = self.state.write().await;
        state.providers.insert(provider.id, provider);
    }

    /// Committed appointments for a provider, ordered by start time. Test
    /// and diagnostics helper; not part of the store contract.
    pub async fn appointments_for(&self, provider_id: Uuid) -> Vec<Appointment> {
        let state = self.state.read().await;
        let mut out: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.provider_id == provider_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.start_time);
        out
    }

    /// Acquire the provider's write-intent lock for this transaction unless
    /// it is already held. Bounded by `lock_wait`.
    async fn ensure_provider_lock(
        &self,
        tx: &TxHandle,
        provider_id: Uuid,
    ) -> Result<(), StoreError> {
        {
            let txs = self.transactions.lock().await;
            let st = txs.get(&tx.id).ok_or(StoreError::TransactionClosed)?;
            if st.guards.contains_key(&provider_id) {
                return Ok(());
            }
        }

        let lock = {
            let mut locks = self.provider_locks.lock().await;
            Arc::clone(
                locks
                    .entry(provider_id)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let guard = timeout(self.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;

        let mut txs = self.transactions.lock().await;
        let st = txs.get_mut(&tx.id).ok_or(StoreError::TransactionClosed)?;
        st.guards.insert(provider_id, guard);
        debug!("write-intent lock acquired for provider {}", provider_id);
        Ok(())
    }

    /// Staged-write overlay for reads inside the owning transaction.
    async fn staged_view(&self, tx: &TxHandle, appointment_id: Uuid) -> Option<Appointment> {
        let txs = self.transactions.lock().await;
        let st = txs.get(&tx.id)?;
        st.staged.iter().rev().find_map(|w| match w {
            StagedWrite::Upsert(a) if a.id == appointment_id => Some(a.clone()),
            _ => None,
        })
    }

    async fn stage(&self, tx: &TxHandle, write: StagedWrite) -> Result<(), StoreError> {
        let mut txs = self.transactions.lock().await;
        let st = txs.get_mut(&tx.id).ok_or(StoreError::TransactionClosed)?;
        st.staged.push(write);
        Ok(())
    }
}

#[async_trait]
impl CalendarStore for MemoryCalendarStore {
    async fn begin(&self) -> Result<TxHandle, StoreError> {
        let id = Uuid::new_v4();
        self.transactions.lock().await.insert(
            id,
            TxState {
                guards: HashMap::new(),
                staged: Vec::new(),
            },
        );
        Ok(TxHandle { id })
    }

    async fn lock_and_fetch_appointments(
        &self,
        tx: &mut TxHandle,
        provider_id: Uuid,
        range: TimeSlot,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.ensure_provider_lock(tx, provider_id).await?;

        let mut by_id: HashMap<Uuid, Appointment> = {
            let state = self.state.read().await;
            state
                .appointments
                .values()
                .filter(|a| a.provider_id == provider_id && a.slot().overlaps(&range))
                .map(|a| (a.id, a.clone()))
                .collect()
        };

        // Overlay writes staged earlier in this same transaction.
        {
            let txs = self.transactions.lock().await;
            let st = txs.get(&tx.id).ok_or(StoreError::TransactionClosed)?;
            for write in &st.staged {
                if let StagedWrite::Upsert(a) = write {
                    if a.provider_id == provider_id && a.slot().overlaps(&range) {
                        by_id.insert(a.id, a.clone());
                    } else {
                        by_id.remove(&a.id);
                    }
                }
            }
        }

        let mut out: Vec<Appointment> = by_id.into_values().collect();
        out.sort_by_key(|a| a.start_time);
        Ok(out)
    }

    async fn fetch_provider(&self, provider_id: Uuid) -> Result<Provider, StoreError> {
        let state = self.state.read().await;
        state
            .providers
            .get(&provider_id)
            .cloned()
            .ok_or(StoreError::ProviderNotFound)
    }

    async fn fetch_appointment(
        &self,
        tx: &mut TxHandle,
        appointment_id: Uuid,
    ) -> Result<Appointment, StoreError> {
        if let Some(staged) = self.staged_view(tx, appointment_id).await {
            return Ok(staged);
        }
        let state = self.state.read().await;
        state
            .appointments
            .get(&appointment_id)
            .cloned()
            .ok_or(StoreError::AppointmentNotFound)
    }

    async fn insert_appointment(
        &self,
        tx: &mut TxHandle,
        appointment: &Appointment,
    ) -> Result<(), StoreError> {
        self.ensure_provider_lock(tx, appointment.provider_id).await?;
        self.stage(tx, StagedWrite::Upsert(appointment.clone())).await
    }

    async fn update_appointment(
        &self,
        tx: &mut TxHandle,
        appointment: &Appointment,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        self.ensure_provider_lock(tx, appointment.provider_id).await?;

        let current = self.fetch_appointment(tx, appointment.id).await?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                current: current.version,
            });
        }
        self.stage(tx, StagedWrite::Upsert(appointment.clone())).await
    }

    async fn find_idempotent(
        &self,
        key: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError> {
        let state = self.state.read().await;
        let Some(record) = state.idempotency.get(&key) else {
            return Ok(None);
        };
        if record.recorded_at < since {
            return Ok(None);
        }
        Ok(state.appointments.get(&record.appointment_id).cloned())
    }

    async fn record_idempotent(
        &self,
        tx: &mut TxHandle,
        key: Uuid,
        appointment_id: Uuid,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.stage(
            tx,
            StagedWrite::Idempotency {
                key,
                appointment_id,
                recorded_at,
            },
        )
        .await
    }

    async fn commit(&self, tx: TxHandle) -> Result<(), StoreError> {
        let st = self
            .transactions
            .lock()
            .await
            .remove(&tx.id)
            .ok_or(StoreError::TransactionClosed)?;

        {
            let mut state = self.state.write().await;
            for write in st.staged {
                match write {
                    StagedWrite::Upsert(a) => {
                        state.appointments.insert(a.id, a);
                    }
                    StagedWrite::Idempotency {
                        key,
                        appointment_id,
                        recorded_at,
                    } => {
                        state.idempotency.insert(
                            key,
                            IdempotencyRecord {
                                appointment_id,
                                recorded_at,
                            },
                        );
                    }
                }
            }
        }
        // Guards drop here, releasing the provider locks after the writes
        // are visible.
        debug!("transaction {} committed", tx.id);
        Ok(())
    }

    async fn rollback(&self, tx: TxHandle) -> Result<(), StoreError> {
        self.transactions
            .lock()
            .await
            .remove(&tx.id)
            .ok_or(StoreError::TransactionClosed)?;
        debug!("transaction {} rolled back", tx.id);
        Ok(())
    }
}
