// libs/scheduling-cell/src/services/validation.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{
    AvailabilityWindowSpec, SchedulingError, SlotInterval, SlotOccurrence,
    MAX_SLOTS_PER_WINDOW, MIN_SLOTS_PER_WINDOW,
};

/// Structural checks shared by window creation and update, plus the
/// booking-time past-slot check.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictValidator;

impl ConflictValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a window spec. All-or-nothing: the first violation rejects the
    /// whole spec. The anchor date may lie in the past.
    pub fn validate_window(&self, spec: &AvailabilityWindowSpec) -> Result<(), SchedulingError> {
        debug!("Validating window spec anchored on {} ({} slots)", spec.anchor_date, spec.slots.len());

        let count = spec.slots.len();
        if !(MIN_SLOTS_PER_WINDOW..=MAX_SLOTS_PER_WINDOW).contains(&count) {
            return Err(self.reject(format!(
                "a window must have between {} and {} slots, got {}",
                MIN_SLOTS_PER_WINDOW, MAX_SLOTS_PER_WINDOW, count
            )));
        }

        for (index, slot) in spec.slots.iter().enumerate() {
            if slot.end <= slot.start {
                return Err(self.reject(format!(
                    "slot {} ends at {} which is not after its start {}",
                    index, slot.end, slot.start
                )));
            }

            if slot.start.date_naive() != spec.anchor_date {
                return Err(self.reject(format!(
                    "slot {} starts on {} but the window is anchored on {}",
                    index, slot.start.date_naive(), spec.anchor_date
                )));
            }
        }

        if let Some((first, second)) = self.find_overlap(&spec.slots) {
            return Err(self.reject(format!("slots {} and {} overlap", first, second)));
        }

        Ok(())
    }

    /// Returns the template indexes of the first overlapping pair, if any.
    pub fn find_overlap(&self, slots: &[SlotInterval]) -> Option<(usize, usize)> {
        let mut ordered: Vec<(usize, &SlotInterval)> = slots.iter().enumerate().collect();
        ordered.sort_by_key(|(_, slot)| slot.start);

        ordered.windows(2).find_map(|pair| {
            let (prev_index, prev) = pair[0];
            let (next_index, next) = pair[1];
            if prev.overlaps(next) {
                Some((prev_index.min(next_index), prev_index.max(next_index)))
            } else {
                None
            }
        })
    }

    /// Reject reservations of slots that have already started.
    pub fn validate_reservation_time(
        &self,
        occurrence: &SlotOccurrence,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        if occurrence.start <= now {
            warn!("Reservation rejected for past slot {} (starts {}, now {})",
                  occurrence.slot_ref, occurrence.start, now);
            return Err(SchedulingError::SlotInPast(occurrence.slot_ref));
        }
        Ok(())
    }

    fn reject(&self, reason: String) -> SchedulingError {
        warn!("Invalid window spec: {}", reason);
        SchedulingError::InvalidWindowSpec(reason)
    }
}
