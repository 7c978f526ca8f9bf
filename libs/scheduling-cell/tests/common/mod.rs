#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use scheduling_cell::{
    AvailabilityWindow, AvailabilityWindowSpec, Booking, FixedClock, InMemoryRepository, Recurrence,
    RepositoryError, Scheduler, SchedulingRepository, SlotInterval, SlotRef, TimeRange, TimeSlot,
};
use shared_config::SchedulerSettings;

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

pub struct TestSetup {
    pub scheduler: Scheduler,
    /// Backing store, bypassing fault injection.
    pub repository: Arc<InMemoryRepository>,
    /// What the scheduler talks to.
    pub faults: Arc<FaultyRepository>,
    pub clock: Arc<FixedClock>,
    pub provider_id: Uuid,
}

impl TestSetup {
    pub fn new() -> Self {
        Self::with_settings(SchedulerSettings::default())
    }

    pub fn with_settings(settings: SchedulerSettings) -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        let faults = Arc::new(FaultyRepository::new(Arc::clone(&repository)));
        let clock = Arc::new(FixedClock::new(utc(2025, 10, 1, 7, 0)));
        let scheduler = Scheduler::new(
            Arc::clone(&faults) as Arc<dyn SchedulingRepository>,
            clock.clone(),
            settings,
        );

        Self {
            scheduler,
            repository,
            faults,
            clock,
            provider_id: Uuid::new_v4(),
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, hour, minute, 0).unwrap()
}

/// Slot on `day` from `start_hour:00` to `end_hour:00`.
pub fn slot(day: NaiveDate, start_hour: u32, end_hour: u32) -> SlotInterval {
    let start = day.and_hms_opt(start_hour, 0, 0).unwrap().and_utc();
    let end = day.and_hms_opt(end_hour, 0, 0).unwrap().and_utc();
    SlotInterval::new(start, end)
}

pub fn spec(day: NaiveDate, recurrence: Recurrence, hours: &[(u32, u32)]) -> AvailabilityWindowSpec {
    AvailabilityWindowSpec {
        anchor_date: day,
        recurrence,
        slots: hours.iter().map(|&(start, end)| slot(day, start, end)).collect(),
    }
}

pub fn day_range(from: NaiveDate, days: i64) -> TimeRange {
    let start = from.and_hms_opt(0, 0, 0).unwrap().and_utc();
    TimeRange::new(start, start + Duration::days(days)).unwrap()
}

// ==============================================================================
// FAULT INJECTION
// ==============================================================================

#[derive(Default)]
struct Fault {
    skip: usize,
    fail: usize,
}

/// Passes every call through to an [`InMemoryRepository`] unless told to fail
/// upcoming calls of a named operation.
pub struct FaultyRepository {
    inner: Arc<InMemoryRepository>,
    faults: Mutex<HashMap<&'static str, Fault>>,
    delete_before_claim: Mutex<Option<Uuid>>,
}

impl FaultyRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            delete_before_claim: Mutex::new(None),
        }
    }

    /// Fail the next `times` calls of `operation`.
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        self.fail_after(operation, 0, times);
    }

    /// Let `skip` calls of `operation` through, then fail the following `times`.
    pub fn fail_after(&self, operation: &'static str, skip: usize, times: usize) {
        self.faults.lock().unwrap().insert(operation, Fault { skip, fail: times });
    }

    /// Delete the window, sweep included, right before the next slot claim lands.
    pub fn delete_window_before_next_claim(&self, window_id: Uuid) {
        *self.delete_before_claim.lock().unwrap() = Some(window_id);
    }

    fn trip(&self, operation: &'static str) -> Result<(), RepositoryError> {
        let mut faults = self.faults.lock().unwrap();
        if let Some(fault) = faults.get_mut(operation) {
            if fault.skip > 0 {
                fault.skip -= 1;
            } else if fault.fail > 0 {
                fault.fail -= 1;
                return Err(RepositoryError::Unavailable(format!("injected {} failure", operation)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SchedulingRepository for FaultyRepository {
    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<(), RepositoryError> {
        self.trip("insert_window")?;
        self.inner.insert_window(window).await
    }

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, RepositoryError> {
        self.trip("get_window")?;
        self.inner.get_window(window_id).await
    }

    async fn list_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, RepositoryError> {
        self.trip("list_windows")?;
        self.inner.list_windows(provider_id).await
    }

    async fn replace_window(&self, window: &AvailabilityWindow, expected_version: u64) -> Result<bool, RepositoryError> {
        self.trip("replace_window")?;
        self.inner.replace_window(window, expected_version).await
    }

    async fn delete_window(&self, window_id: Uuid, expected_version: u64) -> Result<bool, RepositoryError> {
        self.trip("delete_window")?;
        self.inner.delete_window(window_id, expected_version).await
    }

    async fn get_slot(&self, slot_ref: &SlotRef) -> Result<Option<TimeSlot>, RepositoryError> {
        self.trip("get_slot")?;
        self.inner.get_slot(slot_ref).await
    }

    async fn list_slots_for_window(&self, window_id: Uuid) -> Result<Vec<TimeSlot>, RepositoryError> {
        self.trip("list_slots_for_window")?;
        self.inner.list_slots_for_window(window_id).await
    }

    async fn compare_and_swap_slot(&self, slot: &TimeSlot, expected_version: u64) -> Result<bool, RepositoryError> {
        self.trip("compare_and_swap_slot")?;
        let doomed = self.delete_before_claim.lock().unwrap().take();
        if let Some(window_id) = doomed {
            if let Some(window) = self.inner.get_window(window_id).await? {
                self.inner.delete_window(window_id, window.version).await?;
                self.inner.remove_free_slots(window_id).await?;
            }
        }
        self.inner.compare_and_swap_slot(slot, expected_version).await
    }

    async fn remove_slot(&self, slot_ref: &SlotRef, expected_version: u64) -> Result<bool, RepositoryError> {
        self.trip("remove_slot")?;
        self.inner.remove_slot(slot_ref, expected_version).await
    }

    async fn remove_free_slots(&self, window_id: Uuid) -> Result<usize, RepositoryError> {
        self.trip("remove_free_slots")?;
        self.inner.remove_free_slots(window_id).await
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        self.trip("insert_booking")?;
        self.inner.insert_booking(booking).await
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        self.trip("get_booking")?;
        self.inner.get_booking(booking_id).await
    }

    async fn replace_booking(&self, booking: &Booking, expected_version: u64) -> Result<bool, RepositoryError> {
        self.trip("replace_booking")?;
        self.inner.replace_booking(booking, expected_version).await
    }

    async fn list_bookings_for_window(&self, window_id: Uuid) -> Result<Vec<Booking>, RepositoryError> {
        self.trip("list_bookings_for_window")?;
        self.inner.list_bookings_for_window(window_id).await
    }

    async fn list_bookings_for_holder(&self, holder_id: Uuid) -> Result<Vec<Booking>, RepositoryError> {
        self.trip("list_bookings_for_holder")?;
        self.inner.list_bookings_for_holder(holder_id).await
    }
}
