pub mod availability;
pub mod booking;
pub mod consistency;
pub mod fence;
pub mod recurrence;
pub mod validation;

use std::sync::Arc;

use shared_config::{AppConfig, SchedulerSettings};

use crate::clock::{Clock, SystemClock};
use crate::repository::{SchedulingRepository, SupabaseRepository};

pub use availability::{AvailabilityStore, SlotListing};
pub use booking::BookingCoordinator;
pub use consistency::SlotConsistencyChecker;
pub use fence::ChangeFence;
pub use recurrence::{Occurrences, RecurrenceExpander};
pub use validation::ConflictValidator;

/// The scheduler's inbound surface, wired over one repository and clock.
pub struct Scheduler {
    pub availability: AvailabilityStore,
    pub bookings: BookingCoordinator,
    pub consistency: SlotConsistencyChecker,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn SchedulingRepository>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            bookings: BookingCoordinator::new(Arc::clone(&repository), Arc::clone(&clock), &settings),
            availability: AvailabilityStore::new(Arc::clone(&repository), Arc::clone(&clock), settings),
            consistency: SlotConsistencyChecker::new(repository, clock),
        }
    }

    /// Supabase-backed scheduler using the wall clock.
    pub fn from_config(config: &AppConfig, auth_token: Option<String>) -> Self {
        let repository: Arc<dyn SchedulingRepository> =
            Arc::new(SupabaseRepository::new(config, auth_token));
        Self::new(repository, Arc::new(SystemClock), config.scheduler())
    }
}
