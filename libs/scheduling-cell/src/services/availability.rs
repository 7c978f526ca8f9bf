// libs/scheduling-cell/src/services/availability.rs
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulerSettings;

use crate::clock::Clock;
use crate::models::{
    AvailabilityWindow, AvailabilityWindowSpec, AvailableSlot, SchedulingError,
    SlotRef, SlotStatus, TimeRange, TimeSlot,
};
use crate::repository::SchedulingRepository;
use crate::services::fence::ChangeFence;
use crate::services::recurrence::{Occurrences, RecurrenceExpander};
use crate::services::validation::ConflictValidator;

/// Per-provider window collection.
///
/// Updates and deletes never hold a lock. They raise a leased fence on the
/// window (see [`ChangeFence`]), inspect the window's slot instances, then
/// either commit or lower the fence. Reservations look at the window again
/// after claiming their slot and back out if it changed, so a booking can
/// never be orphaned by a concurrent structural change.
pub struct AvailabilityStore {
    repository: Arc<dyn SchedulingRepository>,
    validator: ConflictValidator,
    expander: RecurrenceExpander,
    fence: ChangeFence,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl AvailabilityStore {
    pub fn new(
        repository: Arc<dyn SchedulingRepository>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            validator: ConflictValidator::new(),
            expander: RecurrenceExpander::new(),
            fence: ChangeFence::new(Arc::clone(&repository), Arc::clone(&clock), &settings),
            repository,
            clock,
            settings,
        }
    }

    #[instrument(skip(self, spec), fields(anchor = %spec.anchor_date, recurrence = %spec.recurrence))]
    pub async fn create_window(
        &self,
        provider_id: Uuid,
        spec: AvailabilityWindowSpec,
    ) -> Result<AvailabilityWindow, SchedulingError> {
        self.validator.validate_window(&spec)?;

        let now = self.clock.now();
        let window = AvailabilityWindow {
            id: Uuid::new_v4(),
            provider_id,
            anchor_date: spec.anchor_date,
            recurrence: spec.recurrence,
            slots: spec.slots,
            version: 1,
            fenced_at: None,
            created_at: now,
            updated_at: now,
        };

        self.repository.insert_window(&window).await?;

        info!("Created window {} for provider {} with {} slot(s)",
              window.id, provider_id, window.slots.len());
        Ok(window)
    }

    /// Full replace of the window's anchor, recurrence and slots.
    #[instrument(skip(self, spec))]
    pub async fn update_window(
        &self,
        window_id: Uuid,
        spec: AvailabilityWindowSpec,
    ) -> Result<AvailabilityWindow, SchedulingError> {
        self.validator.validate_window(&spec)?;

        let current = self.load_changeable(window_id).await?;
        let fenced = self.fence.raise(&current).await?;
        let candidate = fenced.with_spec(spec);

        let stranded = match self.stranded_bookings(&candidate).await {
            Ok(stranded) => stranded,
            Err(e) => {
                self.fence.lower(&fenced).await;
                return Err(e);
            }
        };

        if stranded > 0 {
            warn!("Update of window {} would remove or retime {} booked slot(s)", window_id, stranded);
            self.fence.lower(&fenced).await;
            return Err(SchedulingError::WindowHasActiveBookings {
                window_id,
                booked_slots: stranded,
            });
        }

        let updated = candidate.released(self.clock.now());
        let committed = match self.repository.replace_window(&updated, fenced.version).await {
            Ok(committed) => committed,
            Err(e) => {
                self.fence.lower(&fenced).await;
                return Err(e.into());
            }
        };
        if !committed {
            // Our fence expired and was taken over
            warn!("Change fence on window {} lapsed before its update committed", window_id);
            return Err(SchedulingError::WindowModified(window_id));
        }

        info!("Updated window {} to version {}", window_id, updated.version);
        Ok(updated)
    }

    /// Delete a window with no booked slot instances. Never cascades.
    #[instrument(skip(self))]
    pub async fn delete_window(&self, window_id: Uuid) -> Result<(), SchedulingError> {
        let current = self.load_changeable(window_id).await?;
        let fenced = self.fence.raise(&current).await?;

        let booked = match self.repository.list_slots_for_window(window_id).await {
            Ok(slots) => slots.iter().filter(|slot| !slot.is_free()).count(),
            Err(e) => {
                self.fence.lower(&fenced).await;
                return Err(e.into());
            }
        };

        if booked > 0 {
            warn!("Refusing to delete window {} with {} booked slot(s)", window_id, booked);
            self.fence.lower(&fenced).await;
            return Err(SchedulingError::WindowHasActiveBookings {
                window_id,
                booked_slots: booked,
            });
        }

        let deleted = match self.repository.delete_window(window_id, fenced.version).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.fence.lower(&fenced).await;
                return Err(e.into());
            }
        };
        if !deleted {
            warn!("Change fence on window {} lapsed before its delete committed", window_id);
            return Err(SchedulingError::WindowModified(window_id));
        }

        // The delete has committed; a failed sweep only leaves free records behind
        match self.repository.remove_free_slots(window_id).await {
            Ok(swept) => info!("Deleted window {} ({} free slot record(s) swept)", window_id, swept),
            Err(e) => error!("Deleted window {} but failed to sweep its free slot records: {}", window_id, e),
        }
        Ok(())
    }

    pub async fn get_window(&self, window_id: Uuid) -> Result<AvailabilityWindow, SchedulingError> {
        self.repository
            .get_window(window_id)
            .await?
            .ok_or(SchedulingError::WindowNotFound(window_id))
    }

    pub async fn list_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, SchedulingError> {
        Ok(self.repository.list_windows(provider_id).await?)
    }

    /// All of a provider's slot occurrences intersecting `range`, ordered by
    /// start and annotated with their booking status.
    #[instrument(skip(self))]
    pub async fn list_slots(
        &self,
        provider_id: Uuid,
        range: TimeRange,
    ) -> Result<SlotListing, SchedulingError> {
        if range.span() > Duration::days(self.settings.max_query_days) {
            return Err(SchedulingError::InvalidTimeRange(format!(
                "range spans more than {} days", self.settings.max_query_days
            )));
        }

        let windows = self.repository.list_windows(provider_id).await?;
        debug!("Listing slots for provider {} across {} window(s)", provider_id, windows.len());

        let mut sources = Vec::with_capacity(windows.len());
        for window in &windows {
            let states: HashMap<SlotRef, TimeSlot> = self.repository
                .list_slots_for_window(window.id)
                .await?
                .into_iter()
                .map(|slot| (slot.slot_ref, slot))
                .collect();

            sources.push(WindowSlots {
                provider_id: window.provider_id,
                occurrences: self.expander.expand(window, range),
                states,
            });
        }

        Ok(SlotListing::new(sources))
    }

    async fn load_changeable(&self, window_id: Uuid) -> Result<AvailabilityWindow, SchedulingError> {
        let window = self.get_window(window_id).await?;
        self.fence.check(&window)?;
        Ok(window)
    }

    /// Booked instances that would not resolve to the same interval under `candidate`.
    async fn stranded_bookings(&self, candidate: &AvailabilityWindow) -> Result<usize, SchedulingError> {
        let slots = self.repository.list_slots_for_window(candidate.id).await?;

        Ok(slots
            .iter()
            .filter(|slot| !slot.is_free())
            .filter(|slot| {
                self.expander
                    .resolve(candidate, &slot.slot_ref)
                    .map(|occurrence| occurrence.interval() != slot.interval())
                    .unwrap_or(true)
            })
            .count())
    }
}

struct WindowSlots {
    provider_id: Uuid,
    occurrences: Occurrences,
    states: HashMap<SlotRef, TimeSlot>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    start: DateTime<Utc>,
    slot_ref: SlotRef,
    end: DateTime<Utc>,
    source: usize,
}

/// Lazy merge of every window's occurrences, ordered by start time.
pub struct SlotListing {
    sources: Vec<WindowSlots>,
    heap: BinaryHeap<Reverse<Pending>>,
}

impl std::fmt::Debug for SlotListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotListing")
            .field("windows", &self.sources.len())
            .field("pending", &self.heap.len())
            .finish_non_exhaustive()
    }
}

impl SlotListing {
    fn new(mut sources: Vec<WindowSlots>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, window_slots) in sources.iter_mut().enumerate() {
            if let Some(occurrence) = window_slots.occurrences.next() {
                heap.push(Reverse(Pending {
                    start: occurrence.start,
                    slot_ref: occurrence.slot_ref,
                    end: occurrence.end,
                    source,
                }));
            }
        }
        Self { sources, heap }
    }
}

impl Iterator for SlotListing {
    type Item = AvailableSlot;

    fn next(&mut self) -> Option<AvailableSlot> {
        let Reverse(pending) = self.heap.pop()?;
        let window_slots = &mut self.sources[pending.source];

        if let Some(occurrence) = window_slots.occurrences.next() {
            self.heap.push(Reverse(Pending {
                start: occurrence.start,
                slot_ref: occurrence.slot_ref,
                end: occurrence.end,
                source: pending.source,
            }));
        }

        let state = window_slots.states.get(&pending.slot_ref);
        let booking_id = state.and_then(|slot| slot.booking_ref);

        Some(AvailableSlot {
            slot_ref: pending.slot_ref,
            provider_id: window_slots.provider_id,
            start: pending.start,
            end: pending.end,
            status: if booking_id.is_some() { SlotStatus::Booked } else { SlotStatus::Free },
            booking_id,
            version: state.map(|slot| slot.version).unwrap_or(0),
        })
    }
}
