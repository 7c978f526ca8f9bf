// libs/scheduling-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt;

use shared_models::AppError;

pub const MIN_SLOTS_PER_WINDOW: usize = 1;
pub const MAX_SLOTS_PER_WINDOW: usize = 5;

// ==============================================================================
// AVAILABILITY WINDOWS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::None => write!(f, "none"),
            Recurrence::Daily => write!(f, "daily"),
            Recurrence::Weekly => write!(f, "weekly"),
            Recurrence::Monthly => write!(f, "monthly"),
        }
    }
}

/// A start/end pair inside a window template. Half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SlotInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &SlotInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn shifted_by_days(&self, days: i64) -> Self {
        let offset = Duration::days(days);
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// Provider input for creating or fully replacing a window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindowSpec {
    pub anchor_date: NaiveDate,
    pub recurrence: Recurrence,
    pub slots: Vec<SlotInterval>,
}

/// A provider's availability template. Slot state lives in [`TimeSlot`] records,
/// never in the window itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub anchor_date: NaiveDate,
    pub recurrence: Recurrence,
    pub slots: Vec<SlotInterval>,
    pub version: u64,
    /// When an update or delete raised its change fence, if one is up.
    pub fenced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityWindow {
    pub fn spec(&self) -> AvailabilityWindowSpec {
        AvailabilityWindowSpec {
            anchor_date: self.anchor_date,
            recurrence: self.recurrence,
            slots: self.slots.clone(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence != Recurrence::None
    }

    pub fn is_fenced(&self) -> bool {
        self.fenced_at.is_some()
    }

    /// Same content, next version, with the change fence raised at `now`.
    pub(crate) fn fenced(&self, now: DateTime<Utc>) -> Self {
        Self {
            version: self.version + 1,
            fenced_at: Some(now),
            ..self.clone()
        }
    }

    /// Same content, next version, with the change fence lowered.
    pub(crate) fn released(&self, now: DateTime<Utc>) -> Self {
        Self {
            version: self.version + 1,
            fenced_at: None,
            updated_at: now,
            ..self.clone()
        }
    }

    pub(crate) fn with_spec(&self, spec: AvailabilityWindowSpec) -> Self {
        Self {
            anchor_date: spec.anchor_date,
            recurrence: spec.recurrence,
            slots: spec.slots,
            ..self.clone()
        }
    }
}

// ==============================================================================
// SLOT INSTANCES
// ==============================================================================

/// Identity of one bookable occurrence: the window, the date the occurrence
/// falls on, and the slot's position in the window template.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    pub window_id: Uuid,
    pub occurrence_date: NaiveDate,
    pub slot_index: usize,
}

impl SlotRef {
    pub fn new(window_id: Uuid, occurrence_date: NaiveDate, slot_index: usize) -> Self {
        Self { window_id, occurrence_date, slot_index }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.window_id, self.occurrence_date, self.slot_index)
    }
}

/// Materialized, independently versioned slot instance. Created on first
/// reservation; an absent record is a free slot at version 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    #[serde(flatten)]
    pub slot_ref: SlotRef,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub booking_ref: Option<Uuid>,
    pub version: u64,
}

impl TimeSlot {
    pub fn is_free(&self) -> bool {
        self.booking_ref.is_none()
    }

    pub fn interval(&self) -> SlotInterval {
        SlotInterval::new(self.start, self.end)
    }
}

/// A concrete dated slot produced by recurrence expansion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotOccurrence {
    pub slot_ref: SlotRef,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SlotOccurrence {
    pub fn interval(&self) -> SlotInterval {
        SlotInterval::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Free,
    Booked,
}

/// One entry of a provider's slot listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableSlot {
    pub slot_ref: SlotRef,
    pub provider_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SlotStatus,
    pub booking_id: Option<Uuid>,
    pub version: u64,
}

impl AvailableSlot {
    pub fn is_free(&self) -> bool {
        self.status == SlotStatus::Free
    }
}

/// Half-open query range `[from, to)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, SchedulingError> {
        if to <= from {
            return Err(SchedulingError::InvalidTimeRange(format!(
                "range end {} must be after start {}", to, from
            )));
        }
        Ok(Self { from, to })
    }

    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.to && end > self.from
    }

    pub fn span(&self) -> Duration {
        self.to - self.from
    }
}

// ==============================================================================
// BOOKINGS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Active,
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Active => write!(f, "active"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: Uuid,
    #[serde(flatten)]
    pub slot_ref: SlotRef,
    pub holder_id: Uuid,
    pub provider_id: Uuid,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub version: u64,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}

// ==============================================================================
// CONSISTENCY AUDIT
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyViolation {
    /// Slot claims a booking that is missing, cancelled or points elsewhere.
    OrphanedSlot { slot_ref: SlotRef, booking_ref: Uuid },
    /// Active booking whose slot does not point back at it.
    DanglingBooking { booking_id: Uuid, slot_ref: SlotRef },
    DuplicateActiveBookings { slot_ref: SlotRef, booking_ids: Vec<Uuid> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub window_id: Uuid,
    pub checked_slots: usize,
    pub active_bookings: usize,
    pub violations: Vec<ConsistencyViolation>,
    pub checked_at: DateTime<Utc>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SchedulingError {
    #[error("Invalid availability window: {0}")]
    InvalidWindowSpec(String),

    #[error("Availability window {0} not found")]
    WindowNotFound(Uuid),

    #[error("Availability window {window_id} has {booked_slots} active booking(s)")]
    WindowHasActiveBookings { window_id: Uuid, booked_slots: usize },

    #[error("Slot {0} is already booked")]
    SlotAlreadyBooked(SlotRef),

    #[error("Slot {0} is in the past")]
    SlotInPast(SlotRef),

    #[error("Slot {0} does not exist")]
    SlotNotFound(SlotRef),

    #[error("Booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("Booking {0} is already cancelled")]
    BookingAlreadyCancelled(Uuid),

    #[error("Availability window {0} was modified concurrently")]
    WindowModified(Uuid),

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Slot state inconsistent: {0}")]
    SlotStateInconsistent(String),

    #[error("Repository error: {0}")]
    Repository(String),
}

impl SchedulingError {
    /// True only for invariant violations, which indicate a bug rather than contention.
    pub fn is_defect(&self) -> bool {
        matches!(self, SchedulingError::SlotStateInconsistent(_))
    }
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::InvalidWindowSpec(_) | SchedulingError::InvalidTimeRange(_) => {
                AppError::ValidationError(err.to_string())
            }
            SchedulingError::WindowNotFound(_)
            | SchedulingError::SlotNotFound(_)
            | SchedulingError::BookingNotFound(_) => AppError::NotFound(err.to_string()),
            SchedulingError::SlotInPast(_) => AppError::BadRequest(err.to_string()),
            SchedulingError::WindowHasActiveBookings { .. }
            | SchedulingError::SlotAlreadyBooked(_)
            | SchedulingError::BookingAlreadyCancelled(_)
            | SchedulingError::WindowModified(_) => AppError::Conflict(err.to_string()),
            // Details were logged where the defect was detected
            SchedulingError::SlotStateInconsistent(_) => {
                AppError::Internal("Internal scheduling error".to_string())
            }
            SchedulingError::Repository(_) => {
                AppError::Database("Scheduling storage unavailable".to_string())
            }
        }
    }
}
