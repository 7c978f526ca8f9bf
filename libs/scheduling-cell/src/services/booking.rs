// libs/scheduling-cell/src/services/booking.rs
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulerSettings;

use crate::clock::Clock;
use crate::models::{Booking, BookingStatus, SchedulingError, SlotOccurrence, SlotRef, TimeSlot};
use crate::repository::SchedulingRepository;
use crate::services::fence::ChangeFence;
use crate::services::recurrence::RecurrenceExpander;
use crate::services::validation::ConflictValidator;

/// Slot state machine: `FREE -> BOOKED -> FREE`.
///
/// The slot instance's versioned compare-and-swap is the only serialization
/// point. Nothing is locked across steps and nothing is retried: the loser of
/// a race gets `SlotAlreadyBooked` and re-queries.
pub struct BookingCoordinator {
    repository: Arc<dyn SchedulingRepository>,
    validator: ConflictValidator,
    expander: RecurrenceExpander,
    fence: ChangeFence,
    clock: Arc<dyn Clock>,
}

impl BookingCoordinator {
    pub fn new(
        repository: Arc<dyn SchedulingRepository>,
        clock: Arc<dyn Clock>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            validator: ConflictValidator::new(),
            expander: RecurrenceExpander::new(),
            fence: ChangeFence::new(Arc::clone(&repository), Arc::clone(&clock), settings),
            repository,
            clock,
        }
    }

    /// Claim a slot occurrence for `holder_id`.
    #[instrument(skip(self), fields(slot = %slot_ref))]
    pub async fn reserve(&self, slot_ref: SlotRef, holder_id: Uuid) -> Result<Booking, SchedulingError> {
        // Step 1: resolve the occurrence against the current template
        let mut window = self.repository
            .get_window(slot_ref.window_id)
            .await?
            .ok_or(SchedulingError::WindowNotFound(slot_ref.window_id))?;

        self.fence.check(&window)?;
        if window.is_fenced() {
            window = self.fence.reclaim(&window).await?;
        }

        let occurrence = self.expander
            .resolve(&window, &slot_ref)
            .ok_or(SchedulingError::SlotNotFound(slot_ref))?;

        let now = self.clock.now();
        self.validator.validate_reservation_time(&occurrence, now)?;

        // Step 2: read the instance's current state; unmaterialized means free at version 0
        let (booking_ref, version) = match self.repository.get_slot(&slot_ref).await? {
            Some(slot) => (slot.booking_ref, slot.version),
            None => (None, 0),
        };

        // Step 3
        if let Some(existing) = booking_ref {
            debug!("Slot {} already held by booking {}", slot_ref, existing);
            return Err(SchedulingError::SlotAlreadyBooked(slot_ref));
        }

        // Step 4: the compare-and-swap decides the race
        let booking_id = Uuid::new_v4();
        let claimed = TimeSlot {
            slot_ref,
            start: occurrence.start,
            end: occurrence.end,
            booking_ref: Some(booking_id),
            version: version + 1,
        };

        if !self.repository.compare_and_swap_slot(&claimed, version).await? {
            warn!("Lost reservation race for slot {} at version {}", slot_ref, version);
            return Err(SchedulingError::SlotAlreadyBooked(slot_ref));
        }

        // A structural change that started before our write must not strand this booking
        if let Err(e) = self.confirm_window_unchanged(window.version, &occurrence).await {
            return Err(self.release_claim(&claimed, e).await);
        }

        // Step 5
        let booking = Booking {
            id: booking_id,
            slot_ref,
            holder_id,
            provider_id: window.provider_id,
            status: BookingStatus::Active,
            created_at: now,
            cancelled_at: None,
            cancelled_by: None,
            version: 1,
        };

        if let Err(e) = self.repository.insert_booking(&booking).await {
            error!("Failed to persist booking {} for slot {}: {}", booking_id, slot_ref, e);
            return Err(self.release_claim(&claimed, e.into()).await);
        }

        info!("Slot {} booked by {} (booking {}, slot version {})",
              slot_ref, holder_id, booking_id, claimed.version);
        Ok(booking)
    }

    /// Cancel an active booking and free its slot.
    #[instrument(skip(self))]
    pub async fn cancel(&self, booking_id: Uuid, requester_id: Uuid) -> Result<Booking, SchedulingError> {
        // Step 1
        let booking = self.get_booking(booking_id).await?;
        if !booking.is_active() {
            debug!("Booking {} already cancelled", booking_id);
            return Err(SchedulingError::BookingAlreadyCancelled(booking_id));
        }

        // Step 2
        let cancelled = Booking {
            status: BookingStatus::Cancelled,
            cancelled_at: Some(self.clock.now()),
            cancelled_by: Some(requester_id),
            version: booking.version + 1,
            ..booking.clone()
        };

        if !self.repository.replace_booking(&cancelled, booking.version).await? {
            return match self.repository.get_booking(booking_id).await? {
                Some(latest) if !latest.is_active() => {
                    debug!("Booking {} cancelled concurrently", booking_id);
                    Err(SchedulingError::BookingAlreadyCancelled(booking_id))
                }
                _ => Err(self.inconsistent(format!(
                    "booking {} changed version without being cancelled", booking_id
                ))),
            };
        }

        // Step 3: the slot must still point at this booking
        let slot = match self.repository.get_slot(&booking.slot_ref).await? {
            Some(slot) if slot.booking_ref == Some(booking_id) => slot,
            Some(slot) => {
                return Err(self.inconsistent(format!(
                    "slot {} points at {:?} while cancelling booking {}",
                    booking.slot_ref, slot.booking_ref, booking_id
                )));
            }
            None => {
                return Err(self.inconsistent(format!(
                    "slot {} missing while cancelling booking {}", booking.slot_ref, booking_id
                )));
            }
        };

        let freed = TimeSlot {
            booking_ref: None,
            version: slot.version + 1,
            ..slot.clone()
        };

        if !self.repository.compare_and_swap_slot(&freed, slot.version).await? {
            return Err(self.inconsistent(format!(
                "slot {} changed while releasing booking {}", booking.slot_ref, booking_id
            )));
        }

        info!("Booking {} cancelled by {}, slot {} free at version {}",
              booking_id, requester_id, booking.slot_ref, freed.version);
        Ok(cancelled)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, SchedulingError> {
        self.repository
            .get_booking(booking_id)
            .await?
            .ok_or(SchedulingError::BookingNotFound(booking_id))
    }

    /// A holder's bookings, active ones first, each group oldest first.
    pub async fn bookings_for_holder(&self, holder_id: Uuid) -> Result<Vec<Booking>, SchedulingError> {
        let mut bookings = self.repository.list_bookings_for_holder(holder_id).await?;
        bookings.sort_by_key(|booking| (!booking.is_active(), booking.created_at));
        Ok(bookings)
    }

    async fn confirm_window_unchanged(
        &self,
        read_version: u64,
        occurrence: &SlotOccurrence,
    ) -> Result<(), SchedulingError> {
        let window_id = occurrence.slot_ref.window_id;
        match self.repository.get_window(window_id).await? {
            None => {
                warn!("Window {} deleted during reservation of {}", window_id, occurrence.slot_ref);
                Err(SchedulingError::WindowNotFound(window_id))
            }
            Some(window) if window.is_fenced() || window.version != read_version => {
                warn!("Window {} changed during reservation of {}", window_id, occurrence.slot_ref);
                Err(SchedulingError::WindowModified(window_id))
            }
            Some(_) => Ok(()),
        }
    }

    /// Undo our own claim after a later step failed, returning the error to report.
    async fn release_claim(&self, claimed: &TimeSlot, cause: SchedulingError) -> SchedulingError {
        let freed = TimeSlot {
            booking_ref: None,
            version: claimed.version + 1,
            ..claimed.clone()
        };

        match self.repository.compare_and_swap_slot(&freed, claimed.version).await {
            Ok(true) => {
                debug!("Released claim on slot {}", claimed.slot_ref);
                self.discard_if_window_deleted(&freed).await;
                cause
            }
            Ok(false) => self.inconsistent(format!(
                "slot {} changed while releasing an unconfirmed claim", claimed.slot_ref
            )),
            Err(e) => {
                error!("Failed to release claim on slot {}: {}", claimed.slot_ref, e);
                e.into()
            }
        }
    }

    /// A claim released after its window's delete swept the slot records would
    /// never be swept again; remove it ourselves once the window is gone.
    async fn discard_if_window_deleted(&self, freed: &TimeSlot) {
        let window_id = freed.slot_ref.window_id;
        match self.repository.get_window(window_id).await {
            Ok(Some(_)) => {}
            Ok(None) => match self.repository.remove_slot(&freed.slot_ref, freed.version).await {
                Ok(true) => debug!("Removed released slot {} of deleted window {}", freed.slot_ref, window_id),
                Ok(false) => debug!("Released slot {} already swept", freed.slot_ref),
                Err(e) => warn!("Failed to remove released slot {} of deleted window: {}", freed.slot_ref, e),
            },
            Err(e) => warn!("Could not check window {} after releasing slot {}: {}", window_id, freed.slot_ref, e),
        }
    }

    fn inconsistent(&self, detail: String) -> SchedulingError {
        error!("Scheduling invariant violated: {}", detail);
        SchedulingError::SlotStateInconsistent(detail)
    }
}
