//! In-memory repository.
//!
//! Windows, slot instances and bookings live in three independent maps, each
//! behind its own lock. A call takes exactly one lock for the duration of a
//! single lookup or conditional write, so reservations of different slots only
//! ever contend for that short critical section.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::models::{AvailabilityWindow, Booking, SlotRef, TimeSlot};
use crate::repository::{RepositoryError, SchedulingRepository};

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    windows: Arc<RwLock<HashMap<Uuid, AvailabilityWindow>>>,
    slots: Arc<RwLock<HashMap<SlotRef, TimeSlot>>>,
    bookings: Arc<RwLock<HashMap<Uuid, Booking>>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, RepositoryError> {
    lock.read()
        .map_err(|_| RepositoryError::Unavailable("in-memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, RepositoryError> {
    lock.write()
        .map_err(|_| RepositoryError::Unavailable("in-memory store lock poisoned".to_string()))
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of materialized slot instance records, booked or not.
    pub fn slot_record_count(&self) -> usize {
        read(&self.slots).map(|slots| slots.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SchedulingRepository for InMemoryRepository {
    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<(), RepositoryError> {
        let mut windows = write(&self.windows)?;
        if windows.contains_key(&window.id) {
            return Err(RepositoryError::Duplicate(format!("window {}", window.id)));
        }
        windows.insert(window.id, window.clone());
        Ok(())
    }

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, RepositoryError> {
        Ok(read(&self.windows)?.get(&window_id).cloned())
    }

    async fn list_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, RepositoryError> {
        let mut windows: Vec<AvailabilityWindow> = read(&self.windows)?
            .values()
            .filter(|window| window.provider_id == provider_id)
            .cloned()
            .collect();
        windows.sort_by(|a, b| a.anchor_date.cmp(&b.anchor_date).then(a.created_at.cmp(&b.created_at)));
        Ok(windows)
    }

    async fn replace_window(
        &self,
        window: &AvailabilityWindow,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        let mut windows = write(&self.windows)?;
        match windows.get_mut(&window.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = window.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_window(&self, window_id: Uuid, expected_version: u64) -> Result<bool, RepositoryError> {
        let mut windows = write(&self.windows)?;
        match windows.get(&window_id) {
            Some(stored) if stored.version == expected_version => {
                windows.remove(&window_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_slot(&self, slot_ref: &SlotRef) -> Result<Option<TimeSlot>, RepositoryError> {
        Ok(read(&self.slots)?.get(slot_ref).cloned())
    }

    async fn list_slots_for_window(&self, window_id: Uuid) -> Result<Vec<TimeSlot>, RepositoryError> {
        let mut slots: Vec<TimeSlot> = read(&self.slots)?
            .values()
            .filter(|slot| slot.slot_ref.window_id == window_id)
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.slot_ref);
        Ok(slots)
    }

    async fn compare_and_swap_slot(
        &self,
        slot: &TimeSlot,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        let mut slots = write(&self.slots)?;
        let current_version = slots.get(&slot.slot_ref).map(|stored| stored.version).unwrap_or(0);
        if current_version != expected_version {
            return Ok(false);
        }
        slots.insert(slot.slot_ref, slot.clone());
        Ok(true)
    }

    async fn remove_slot(&self, slot_ref: &SlotRef, expected_version: u64) -> Result<bool, RepositoryError> {
        let mut slots = write(&self.slots)?;
        match slots.get(slot_ref) {
            Some(stored) if stored.version == expected_version => {
                slots.remove(slot_ref);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_free_slots(&self, window_id: Uuid) -> Result<usize, RepositoryError> {
        let mut slots = write(&self.slots)?;
        let before = slots.len();
        slots.retain(|slot_ref, slot| slot_ref.window_id != window_id || !slot.is_free());
        Ok(before - slots.len())
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        let mut bookings = write(&self.bookings)?;
        if bookings.contains_key(&booking.id) {
            return Err(RepositoryError::Duplicate(format!("booking {}", booking.id)));
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        Ok(read(&self.bookings)?.get(&booking_id).cloned())
    }

    async fn replace_booking(
        &self,
        booking: &Booking,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        let mut bookings = write(&self.bookings)?;
        match bookings.get_mut(&booking.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = booking.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_bookings_for_window(&self, window_id: Uuid) -> Result<Vec<Booking>, RepositoryError> {
        let mut bookings: Vec<Booking> = read(&self.bookings)?
            .values()
            .filter(|booking| booking.slot_ref.window_id == window_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|booking| booking.created_at);
        Ok(bookings)
    }

    async fn list_bookings_for_holder(&self, holder_id: Uuid) -> Result<Vec<Booking>, RepositoryError> {
        let mut bookings: Vec<Booking> = read(&self.bookings)?
            .values()
            .filter(|booking| booking.holder_id == holder_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|booking| booking.created_at);
        Ok(bookings)
    }
}
