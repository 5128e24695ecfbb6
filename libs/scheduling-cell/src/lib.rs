// libs/scheduling-cell/src/lib.rs
//
// Appointment scheduling core: availability resolution, conflict checking,
// booking lifecycle, and the concurrency-safe scheduler facade. Storage is
// abstracted behind the transactional `CalendarStore` seam; an in-memory
// reference implementation lives in `store::memory`.

pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use error::SchedulingError;
pub use models::{
    Appointment, AppointmentStatus, AvailabilityException, AvailabilityWindow, BookingRequest,
    ConflictResult, ExceptionReason, Provider, RecurringRule, RulePolicy, TimeSlot,
};
pub use services::availability::AvailabilityResolver;
pub use services::conflict::ConflictChecker;
pub use services::lifecycle::BookingStateMachine;
pub use services::scheduler::SchedulerService;
pub use store::memory::MemoryCalendarStore;
pub use store::{CalendarStore, StoreError, TxHandle};
