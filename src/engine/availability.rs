use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::Engine;

// ── Availability sweep ────────────────────────────────────

/// Filter for a free-slot sweep across the catalog. Unset fields
/// don't constrain; `date` defaults to the clock's today.
#[derive(Debug, Clone)]
pub struct AvailabilityFilter {
    pub family: ResourceFamily,
    pub date: Option<NaiveDate>,
    /// Ignore gaps that end before this time of day.
    pub from: Option<NaiveTime>,
    /// Only report gaps at least this long.
    pub min_minutes: Option<i64>,
    pub os: Option<String>,
    pub brand: Option<String>,
    pub min_capacity: Option<u32>,
}

impl AvailabilityFilter {
    pub fn for_family(family: ResourceFamily) -> Self {
        Self {
            family,
            date: None,
            from: None,
            min_minutes: None,
            os: None,
            brand: None,
            min_capacity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAvailability {
    pub resource_id: Ulid,
    /// Chronological free windows. Empty means fully booked that day.
    pub free: Vec<Window>,
}

fn attributes_match(kind: &ResourceKind, filter: &AvailabilityFilter) -> bool {
    match kind {
        ResourceKind::Cubicle { capacity } => {
            filter.min_capacity.is_none_or(|min| *capacity >= min)
        }
        ResourceKind::Laptop { os, brand } => {
            filter
                .os
                .as_deref()
                .is_none_or(|want| os.eq_ignore_ascii_case(want))
                && filter
                    .brand
                    .as_deref()
                    .is_none_or(|want| brand.eq_ignore_ascii_case(want))
        }
        ResourceKind::BookCopy { .. } => true,
    }
}

impl Engine {
    /// Free windows for every matching resource on one day, ordered by
    /// resource id. Each resource is read under its own lock, so every
    /// entry is consistent with any commit in flight on that resource.
    ///
    /// Book copies are day-granular and never listed here; use
    /// `loanable_copies` for those.
    pub async fn availability(&self, filter: &AvailabilityFilter) -> Vec<ResourceAvailability> {
        if filter.family == ResourceFamily::BookCopy {
            return Vec::new();
        }
        let date = filter.date.unwrap_or_else(|| self.clock.today());

        let mut ids: Vec<Ulid> = self.resources.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut out = Vec::new();
        for id in ids {
            let Some(rs_arc) = self.get_resource(&id) else {
                continue;
            };
            let rs = rs_arc.read().await;
            if rs.kind.family() != filter.family
                || rs.status != AdminStatus::Available
                || !attributes_match(&rs.kind, filter)
            {
                continue;
            }
            let free = rs
                .schedule
                .free_slots(date, self.policy.hours, filter.from, filter.min_minutes)
                .collect();
            out.push(ResourceAvailability { resource_id: id, free });
        }
        out
    }
}
