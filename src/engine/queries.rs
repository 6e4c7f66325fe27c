use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::limits::MAX_SPAN_DAYS_CEILING;
use crate::model::*;
use crate::observability;

use super::{BookingError, BookingManager, StatusUpdate, StoreError};

impl BookingManager {
    /// Fetch one booking. A confirmed booking whose end date has passed is completed
    /// on the way out.
    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, BookingError> {
        let booking = self.store.get(id).await?.ok_or(BookingError::NotFound(id))?;
        self.settle(booking).await
    }

    /// One page of bookings matching `filter`, newest first.
    ///
    /// `page` is 1-indexed and defaults to 1. `limit` defaults to the configured page
    /// size and is capped at the configured maximum.
    pub async fn list_bookings(
        &self,
        filter: &BookingFilter,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Page<Booking>, BookingError> {
        let started = Instant::now();
        let result = self.list_inner(filter, page, limit).await;
        observability::record_outcome("list", started, &result);
        result
    }

    async fn list_inner(
        &self,
        filter: &BookingFilter,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Page<Booking>, BookingError> {
        let page = page.unwrap_or(1).max(1);
        let limit = match limit {
            Some(0) | None => self.config.default_page_limit,
            Some(n) => n.min(self.config.max_page_limit),
        }
        .max(1);

        // Completion is lazy, so settle elapsed bookings before a filter on status can
        // see stale `confirmed` records.
        if matches!(
            filter.status,
            None | Some(BookingStatus::Confirmed) | Some(BookingStatus::Completed)
        ) {
            self.settle_elapsed(filter).await?;
        }

        let offset = (page as usize - 1).saturating_mul(limit as usize);
        let (items, total) = self.store.list(filter, offset, limit as usize).await?;
        let total_pages = total.div_ceil(limit as usize);
        Ok(Page {
            items,
            pagination: PaginationMeta {
                current_page: page,
                total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
                total_results: total,
                limit,
            },
        })
    }

    /// Free sub-ranges of `[from, to)` on one resource.
    pub async fn available_spans(
        &self,
        kind: BookingType,
        resource_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Span>, BookingError> {
        if to <= from {
            return Err(BookingError::InvalidDateRange(format!(
                "window end {to} must be after start {from}"
            )));
        }
        let window = Span::new(from, to);
        if window.days() > MAX_SPAN_DAYS_CEILING {
            return Err(BookingError::InvalidDateRange(format!(
                "window of {} days exceeds {MAX_SPAN_DAYS_CEILING}",
                window.days()
            )));
        }
        if self.catalog.lookup(kind, resource_id).await?.is_none() {
            return Err(BookingError::ResourceNotFound {
                kind,
                id: resource_id.to_string(),
            });
        }
        let key = ResourceKey::new(kind, resource_id);
        Ok(self.index.available_spans(&key, window).await)
    }

    /// Complete `booking` if it is confirmed and its end date has arrived.
    pub(super) async fn settle(&self, booking: Booking) -> Result<Booking, BookingError> {
        if !booking.is_elapsed(self.clock.today()) {
            return Ok(booking);
        }
        let change = StatusUpdate {
            status: BookingStatus::Completed,
            reason: None,
            at: self.clock.now(),
        };
        let completed = match self
            .store
            .update(booking.id, BookingStatus::Confirmed, change)
            .await
        {
            Ok(b) => b,
            // Someone else moved it first; report what is stored now.
            Err(StoreError::StatusMismatch { .. }) => {
                return self
                    .store
                    .get(booking.id)
                    .await?
                    .ok_or(BookingError::NotFound(booking.id));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("booking {} completed", completed.id);
        metrics::counter!(observability::BOOKINGS_COMPLETED_TOTAL).increment(1);

        // The interval lies entirely before today, so a failed release cannot block a
        // new booking.
        let key = completed.resource_key();
        match self.index.release(&key, completed.id).await {
            Ok(true) => metrics::gauge!(observability::HELD_INTERVALS).decrement(1.0),
            Ok(false) => {}
            Err(e) => warn!("completed booking {} still holds {key}: {e}", completed.id),
        }
        Ok(completed)
    }

    async fn settle_elapsed(&self, filter: &BookingFilter) -> Result<(), BookingError> {
        let confirmed = filter.with_status(BookingStatus::Confirmed);
        let (candidates, _) = self.store.list(&confirmed, 0, usize::MAX).await?;
        let today = self.clock.today();
        for b in candidates.into_iter().filter(|b| b.is_elapsed(today)) {
            self.settle(b).await?;
        }
        Ok(())
    }
}
