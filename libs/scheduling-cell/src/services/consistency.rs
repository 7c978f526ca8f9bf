// libs/scheduling-cell/src/services/consistency.rs
//
// Audits the booking_ref <-> Booking invariant for one window: a slot instance
// is booked iff exactly one active booking references it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{ConsistencyReport, ConsistencyViolation, SchedulingError, SlotRef};
use crate::repository::SchedulingRepository;

pub struct SlotConsistencyChecker {
    repository: Arc<dyn SchedulingRepository>,
    clock: Arc<dyn Clock>,
}

impl SlotConsistencyChecker {
    pub fn new(repository: Arc<dyn SchedulingRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn check_window(&self, window_id: Uuid) -> Result<ConsistencyReport, SchedulingError> {
        let slots = self.repository.list_slots_for_window(window_id).await?;
        let bookings = self.repository.list_bookings_for_window(window_id).await?;

        let mut active_by_slot: HashMap<SlotRef, Vec<Uuid>> = HashMap::new();
        for booking in bookings.iter().filter(|booking| booking.is_active()) {
            active_by_slot.entry(booking.slot_ref).or_default().push(booking.id);
        }
        let slot_refs: HashMap<SlotRef, Option<Uuid>> = slots
            .iter()
            .map(|slot| (slot.slot_ref, slot.booking_ref))
            .collect();

        let mut violations = Vec::new();

        for (slot_ref, booking_ids) in &active_by_slot {
            if booking_ids.len() > 1 {
                violations.push(ConsistencyViolation::DuplicateActiveBookings {
                    slot_ref: *slot_ref,
                    booking_ids: booking_ids.clone(),
                });
            }
            for booking_id in booking_ids {
                if slot_refs.get(slot_ref).copied().flatten() != Some(*booking_id) {
                    violations.push(ConsistencyViolation::DanglingBooking {
                        booking_id: *booking_id,
                        slot_ref: *slot_ref,
                    });
                }
            }
        }

        for slot in slots.iter().filter(|slot| !slot.is_free()) {
            let Some(booking_ref) = slot.booking_ref else { continue };
            let backed = active_by_slot
                .get(&slot.slot_ref)
                .map(|ids| ids.contains(&booking_ref))
                .unwrap_or(false);
            if !backed {
                violations.push(ConsistencyViolation::OrphanedSlot {
                    slot_ref: slot.slot_ref,
                    booking_ref,
                });
            }
        }

        for violation in &violations {
            error!("Consistency violation in window {}: {:?}", window_id, violation);
        }
        debug!("Checked {} slot record(s) in window {}: {} violation(s)",
               slots.len(), window_id, violations.len());

        Ok(ConsistencyReport {
            window_id,
            checked_slots: slots.len(),
            active_bookings: active_by_slot.values().map(Vec::len).sum(),
            violations,
            checked_at: self.clock.now(),
        })
    }
}
