// libs/scheduling-cell/src/services/recurrence.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

use crate::models::{AvailabilityWindow, Recurrence, SlotOccurrence, SlotRef, TimeRange};

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

/// Turns window templates into dated slot occurrences.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecurrenceExpander;

impl RecurrenceExpander {
    pub fn new() -> Self {
        Self
    }

    /// Lazily expand `window` into occurrences intersecting `range`, ordered by start.
    pub fn expand(&self, window: &AvailabilityWindow, range: TimeRange) -> Occurrences {
        Occurrences::new(window.clone(), range)
    }

    /// Whether the window's recurrence produces an occurrence on `date`.
    pub fn occurs_on(&self, window: &AvailabilityWindow, date: NaiveDate) -> bool {
        if date < window.anchor_date {
            return false;
        }
        match window.recurrence {
            Recurrence::None => date == window.anchor_date,
            Recurrence::Daily => true,
            Recurrence::Weekly => (date - window.anchor_date).num_days() % 7 == 0,
            Recurrence::Monthly => date.day() == window.anchor_date.day(),
        }
    }

    /// Resolve a slot reference against the window's current template.
    pub fn resolve(&self, window: &AvailabilityWindow, slot_ref: &SlotRef) -> Option<SlotOccurrence> {
        if slot_ref.window_id != window.id || !self.occurs_on(window, slot_ref.occurrence_date) {
            return None;
        }
        let template = window.slots.get(slot_ref.slot_index)?;
        let interval = template.shifted_by_days((slot_ref.occurrence_date - window.anchor_date).num_days());

        Some(SlotOccurrence {
            slot_ref: *slot_ref,
            start: interval.start,
            end: interval.end,
        })
    }
}

/// Candidate occurrence dates, bounded above by the query range.
struct OccurrenceDates {
    anchor: NaiveDate,
    recurrence: Recurrence,
    /// Days (daily, weekly) or months (monthly) since the anchor.
    offset: i64,
    upper: DateTime<Utc>,
    exhausted: bool,
}

impl OccurrenceDates {
    fn new(anchor: NaiveDate, recurrence: Recurrence, lower: NaiveDate, upper: DateTime<Utc>) -> Self {
        let offset = if lower <= anchor {
            0
        } else {
            match recurrence {
                Recurrence::None => 0,
                Recurrence::Daily => (lower - anchor).num_days(),
                Recurrence::Weekly => {
                    let days = (lower - anchor).num_days();
                    (days + 6) / 7 * 7
                }
                Recurrence::Monthly => month_index(lower) - month_index(anchor),
            }
        };

        Self { anchor, recurrence, offset, upper, exhausted: false }
    }

    fn month_first(&self) -> Option<NaiveDate> {
        let index = month_index(self.anchor) + self.offset;
        NaiveDate::from_ymd_opt(index.div_euclid(12) as i32, index.rem_euclid(12) as u32 + 1, 1)
    }
}

impl Iterator for OccurrenceDates {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.exhausted {
            return None;
        }

        let candidate = match self.recurrence {
            Recurrence::None => {
                self.exhausted = true;
                Some(self.anchor)
            }
            Recurrence::Daily | Recurrence::Weekly => {
                let step = if self.recurrence == Recurrence::Daily { 1 } else { 7 };
                let date = self.anchor.checked_add_signed(Duration::days(self.offset));
                self.offset += step;
                date
            }
            Recurrence::Monthly => loop {
                let first = self.month_first()?;
                if start_of_day(first) >= self.upper {
                    self.exhausted = true;
                    return None;
                }
                self.offset += 1;
                // Months without the anchor's day are skipped
                if let Some(date) = first.with_day(self.anchor.day()) {
                    break Some(date);
                }
            },
        };

        match candidate {
            Some(date) if start_of_day(date) < self.upper => Some(date),
            _ => {
                self.exhausted = true;
                None
            }
        }
    }
}

/// Lazy sequence of a single window's occurrences within a range.
pub struct Occurrences {
    window: AvailabilityWindow,
    range: TimeRange,
    /// Template indexes ordered by start time.
    order: Vec<usize>,
    dates: OccurrenceDates,
    current_date: Option<NaiveDate>,
    position: usize,
}

impl Occurrences {
    fn new(window: AvailabilityWindow, range: TimeRange) -> Self {
        let mut order: Vec<usize> = (0..window.slots.len()).collect();
        order.sort_by_key(|&index| window.slots[index].start);

        // An occurrence dated before the range can still reach into it
        let longest = window.slots.iter()
            .map(|slot| slot.duration())
            .max()
            .unwrap_or_else(Duration::zero);
        let lower = range.from
            .checked_sub_signed(longest)
            .and_then(|reach| reach.date_naive().checked_sub_signed(Duration::days(1)))
            .unwrap_or(window.anchor_date);

        let dates = OccurrenceDates::new(window.anchor_date, window.recurrence, lower, range.to);

        Self {
            window,
            range,
            order,
            dates,
            current_date: None,
            position: 0,
        }
    }
}

impl Iterator for Occurrences {
    type Item = SlotOccurrence;

    fn next(&mut self) -> Option<SlotOccurrence> {
        loop {
            let date = match self.current_date {
                Some(date) => date,
                None => {
                    let date = self.dates.next()?;
                    self.current_date = Some(date);
                    self.position = 0;
                    date
                }
            };

            let Some(&slot_index) = self.order.get(self.position) else {
                self.current_date = None;
                continue;
            };
            self.position += 1;

            let days = (date - self.window.anchor_date).num_days();
            let interval = self.window.slots[slot_index].shifted_by_days(days);
            if self.range.intersects(interval.start, interval.end) {
                return Some(SlotOccurrence {
                    slot_ref: SlotRef::new(self.window.id, date, slot_index),
                    start: interval.start,
                    end: interval.end,
                });
            }
        }
    }
}
