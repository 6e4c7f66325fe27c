use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::limits::MAX_INTERVALS_PER_RESOURCE;
use crate::model::*;

use super::conflict::find_conflict;

pub type SharedSchedule = Arc<RwLock<ResourceSchedule>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("overlaps booking {0}")]
    Conflict(BookingId),
    #[error("timed out waiting for the {0} schedule")]
    LockTimeout(ResourceKey),
    #[error("{0} holds too many intervals")]
    Full(ResourceKey),
}

/// Occupied intervals per resource.
///
/// Each resource key has its own lock, so reservations on different resources never
/// wait on each other. Locks are only held for the check-and-mutate itself.
pub struct AvailabilityIndex {
    schedules: DashMap<ResourceKey, SharedSchedule>,
    lock_timeout: Duration,
}

impl AvailabilityIndex {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            schedules: DashMap::new(),
            lock_timeout,
        }
    }

    pub fn schedule(&self, key: &ResourceKey) -> Option<SharedSchedule> {
        self.schedules.get(key).map(|e| e.value().clone())
    }

    fn schedule_or_create(&self, key: &ResourceKey) -> SharedSchedule {
        if let Some(rs) = self.schedule(key) {
            return rs;
        }
        self.schedules
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(ResourceSchedule::new())))
            .value()
            .clone()
    }

    async fn lock(
        &self,
        key: &ResourceKey,
        rs: SharedSchedule,
    ) -> Result<OwnedRwLockWriteGuard<ResourceSchedule>, AvailabilityError> {
        tokio::time::timeout(self.lock_timeout, rs.write_owned())
            .await
            .map_err(|_| AvailabilityError::LockTimeout(key.clone()))
    }

    /// Atomically check `span` against the resource's intervals and claim it for
    /// `booking_id`. Nothing is claimed on conflict.
    ///
    /// Intervals that ended on or before `today` can no longer collide with anything
    /// and are dropped while the lock is held. Returns how many were dropped.
    pub async fn reserve(
        &self,
        key: &ResourceKey,
        span: Span,
        booking_id: BookingId,
        today: NaiveDate,
    ) -> Result<usize, AvailabilityError> {
        let rs = self.schedule_or_create(key);
        let mut guard = self.lock(key, rs).await?;
        let pruned = guard.prune_ended(today);

        if let Some(existing) = find_conflict(&guard, &span) {
            return Err(AvailabilityError::Conflict(existing));
        }
        if guard.intervals.len() >= MAX_INTERVALS_PER_RESOURCE {
            return Err(AvailabilityError::Full(key.clone()));
        }
        guard.insert_interval(Interval { booking_id, span });
        Ok(pruned)
    }

    /// Drop the interval owned by `booking_id`. Returns whether one was held; releasing
    /// twice is not an error.
    pub async fn release(
        &self,
        key: &ResourceKey,
        booking_id: BookingId,
    ) -> Result<bool, AvailabilityError> {
        let Some(rs) = self.schedule(key) else {
            return Ok(false);
        };
        let mut guard = self.lock(key, rs).await?;
        Ok(guard.remove_interval(booking_id).is_some())
    }

    /// Free sub-ranges of `window` on one resource.
    pub async fn available_spans(&self, key: &ResourceKey, window: Span) -> Vec<Span> {
        let Some(rs) = self.schedule(key) else {
            return vec![window];
        };
        let guard = rs.read().await;
        let taken: Vec<Span> = guard.overlapping(&window).map(|i| i.span).collect();
        subtract_intervals(&[window], &taken)
    }

    pub fn resource_count(&self) -> usize {
        self.schedules.len()
    }

    /// Total held intervals across all resources.
    pub async fn interval_count(&self) -> usize {
        let all: Vec<SharedSchedule> = self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut n = 0;
        for rs in all {
            n += rs.read().await.intervals.len();
        }
        n
    }

    /// Repopulate from stored bookings at startup. Bookings that do not hold an interval,
    /// or whose stay ended on or before `today`, are skipped; two live bookings that
    /// overlap are reported as a conflict.
    pub async fn rebuild<'a>(
        &self,
        bookings: impl IntoIterator<Item = &'a Booking>,
        today: NaiveDate,
    ) -> Result<usize, (BookingId, AvailabilityError)> {
        let mut n = 0;
        for b in bookings {
            if !b.status.holds_interval() || b.end_date <= today {
                continue;
            }
            self.reserve(&b.resource_key(), b.span(), b.id, today)
                .await
                .map_err(|e| (b.id, e))?;
            n += 1;
        }
        Ok(n)
    }
}

/// Remove sorted `to_remove` spans from sorted, disjoint `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}
