use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::Window;

/// One committed window, tagged with the booking that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commitment {
    pub booking_id: Ulid,
    pub window: Window,
}

/// Per-resource index of committed reservation windows, bucketed by
/// date. This is the sole authority on double-booking: a window exists
/// here iff a non-cancelled booking owns it.
///
/// The index itself is unsynchronized; the `RwLock` around the owning
/// `ResourceState` serializes writers.
#[derive(Debug, Default)]
pub struct IntervalIndex {
    days: BTreeMap<NaiveDate, Vec<Commitment>>,
}

impl IntervalIndex {
    /// Id of the first committed window overlapping `window` on
    /// `date`, if any.
    pub fn conflict(&self, date: NaiveDate, window: &Window) -> Option<Ulid> {
        let day = self.days.get(&date)?;
        // Everything at index >= right_bound starts at or after window.end → can't overlap.
        let right_bound = day.partition_point(|c| c.window.start < window.end);
        day[..right_bound]
            .iter()
            .find(|c| c.window.end > window.start)
            .map(|c| c.booking_id)
    }

    pub fn overlaps(&self, date: NaiveDate, window: &Window) -> bool {
        self.conflict(date, window).is_some()
    }

    /// Unconditional insert, maintaining sort order by window start.
    /// Callers check `conflict` first; the replay path trusts the log.
    pub fn insert(&mut self, date: NaiveDate, window: Window, booking_id: Ulid) {
        let day = self.days.entry(date).or_default();
        let pos = day
            .binary_search_by_key(&window.start, |c| c.window.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, Commitment { booking_id, window });
    }

    /// Remove the booking's window from the given day. Returns false
    /// if no such commitment existed.
    pub fn release(&mut self, date: NaiveDate, booking_id: Ulid) -> bool {
        let Some(day) = self.days.get_mut(&date) else {
            return false;
        };
        let Some(pos) = day.iter().position(|c| c.booking_id == booking_id) else {
            return false;
        };
        day.remove(pos);
        if day.is_empty() {
            self.days.remove(&date);
        }
        true
    }

    pub fn day_len(&self, date: NaiveDate) -> usize {
        self.days.get(&date).map_or(0, |d| d.len())
    }

    /// Committed windows on `date`, chronological.
    pub fn commitments_on(&self, date: NaiveDate) -> &[Commitment] {
        self.days.get(&date).map_or(&[], |d| d.as_slice())
    }

    /// Gaps between commitments on `date`, clipped to `hours`.
    /// `from` trims the search to start no earlier than that instant;
    /// `min_minutes` drops gaps too short to be useful. The returned
    /// iterator owns a snapshot — clone it before consuming to walk
    /// the same sequence twice.
    pub fn free_slots(
        &self,
        date: NaiveDate,
        hours: Window,
        from: Option<NaiveTime>,
        min_minutes: Option<i64>,
    ) -> FreeSlots {
        let mut busy: Vec<Window> = self
            .commitments_on(date)
            .iter()
            .filter(|c| c.window.overlaps(&hours))
            .map(|c| {
                Window::new(
                    c.window.start.max(hours.start),
                    c.window.end.min(hours.end),
                )
            })
            .collect();
        // Sorted already (per-day order), but merge touching neighbors
        // so the gap walk sees disjoint busy ranges.
        let mut merged: Vec<Window> = Vec::with_capacity(busy.len());
        for w in busy.drain(..) {
            if let Some(last) = merged.last_mut()
                && w.start <= last.end
            {
                last.end = last.end.max(w.end);
                continue;
            }
            merged.push(w);
        }

        let cursor = from.map_or(hours.start, |f| f.max(hours.start));
        FreeSlots {
            busy: merged.into(),
            bounds: hours,
            min_minutes: min_minutes.unwrap_or(0),
            cursor,
            idx: 0,
            done: cursor >= hours.end,
        }
    }
}

/// Lazy walk over the free gaps of one day. Finite, and restartable
/// by cloning before the first `next`.
#[derive(Debug, Clone)]
pub struct FreeSlots {
    busy: Arc<[Window]>,
    bounds: Window,
    min_minutes: i64,
    cursor: NaiveTime,
    idx: usize,
    done: bool,
}

impl Iterator for FreeSlots {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        while !self.done {
            let gap_start = self.cursor;
            let gap_end = match self.busy.get(self.idx) {
                Some(b) => {
                    // cursor never moves backwards past an already-passed busy range
                    self.cursor = self.cursor.max(b.end);
                    self.idx += 1;
                    b.start
                }
                None => {
                    self.done = true;
                    self.bounds.end
                }
            };
            if gap_start < gap_end {
                let gap = Window::new(gap_start, gap_end);
                if gap.duration_minutes() >= self.min_minutes {
                    return Some(gap);
                }
            }
        }
        None
    }
}
