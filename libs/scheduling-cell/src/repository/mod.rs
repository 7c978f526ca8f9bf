//! Persistence adapter for the scheduler.
//!
//! Every mutation of a window, slot instance or booking goes through a
//! conditional write keyed on the record's `version`. Implementations must make
//! each call linearizable: a compare-and-swap either observes the expected
//! version and writes, or writes nothing and returns `false`.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{AvailabilityWindow, Booking, SchedulingError, SlotRef, TimeSlot};

pub use memory::InMemoryRepository;
pub use supabase::SupabaseRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Failed to decode stored record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<RepositoryError> for SchedulingError {
    fn from(err: RepositoryError) -> Self {
        SchedulingError::Repository(err.to_string())
    }
}

#[async_trait]
pub trait SchedulingRepository: Send + Sync {
    // Windows

    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<(), RepositoryError>;

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, RepositoryError>;

    async fn list_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, RepositoryError>;

    /// Replaces the window iff the stored version equals `expected_version`.
    async fn replace_window(
        &self,
        window: &AvailabilityWindow,
        expected_version: u64,
    ) -> Result<bool, RepositoryError>;

    /// Deletes the window iff the stored version equals `expected_version`.
    async fn delete_window(&self, window_id: Uuid, expected_version: u64) -> Result<bool, RepositoryError>;

    // Slot instances

    async fn get_slot(&self, slot_ref: &SlotRef) -> Result<Option<TimeSlot>, RepositoryError>;

    async fn list_slots_for_window(&self, window_id: Uuid) -> Result<Vec<TimeSlot>, RepositoryError>;

    /// Writes `slot` iff the stored version equals `expected_version`.
    /// An expected version of 0 means the record must not exist yet.
    async fn compare_and_swap_slot(
        &self,
        slot: &TimeSlot,
        expected_version: u64,
    ) -> Result<bool, RepositoryError>;

    /// Removes the record iff the stored version equals `expected_version`.
    async fn remove_slot(&self, slot_ref: &SlotRef, expected_version: u64) -> Result<bool, RepositoryError>;

    /// Removes the window's instance records that hold no booking.
    async fn remove_free_slots(&self, window_id: Uuid) -> Result<usize, RepositoryError>;

    // Bookings

    async fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError>;

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, RepositoryError>;

    /// Replaces the booking iff the stored version equals `expected_version`.
    async fn replace_booking(
        &self,
        booking: &Booking,
        expected_version: u64,
    ) -> Result<bool, RepositoryError>;

    async fn list_bookings_for_window(&self, window_id: Uuid) -> Result<Vec<Booking>, RepositoryError>;

    async fn list_bookings_for_holder(&self, holder_id: Uuid) -> Result<Vec<Booking>, RepositoryError>;
}
