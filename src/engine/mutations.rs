use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::task::JoinError;
use tracing::{info, warn};
use ulid::Ulid;
use validator::Validate;

use crate::catalog::{CatalogError, ResourceInfo};
use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability;

use super::conflict::{unit_count, validate_range};
use super::{
    availability_error, compensate, release_or_leak, AvailabilityIndex, BookingError,
    BookingManager, BookingStore, StatusUpdate, StoreError,
};

impl BookingManager {
    /// Validate, price and reserve a new booking, then persist it as `pending`
    /// (`confirmed` when auto-confirm is on).
    ///
    /// Exactly one of several racing requests for overlapping dates on one resource
    /// succeeds; the rest get [`BookingError::BookingConflict`].
    pub async fn create_booking(&self, input: NewBooking) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.create_inner(input).await;
        observability::record_outcome("create", started, &result);
        if let Ok(b) = &result {
            info!(
                "booking {} created on {}/{} for {} ({})",
                b.id,
                b.booking_type,
                b.resource_id,
                b.span(),
                b.status
            );
        }
        result
    }

    async fn create_inner(&self, input: NewBooking) -> Result<Booking, BookingError> {
        input.validate()?;
        let today = self.clock.today();
        let span = validate_range(
            input.start_date,
            input.end_date,
            today,
            self.config.max_span_days,
        )?;
        let key = input.resource_key();

        let info = self
            .catalog
            .lookup(input.booking_type, &input.resource_id)
            .await?
            .ok_or_else(|| BookingError::ResourceNotFound {
                kind: input.booking_type,
                id: input.resource_id.clone(),
            })?;
        check_listing(&key, &info, &input)?;

        let units = unit_count(input.booking_type, &span);
        let total_price = self
            .config
            .pricing
            .price(info.pricing_unit, units, input.guests)?;

        let now = self.clock.now();
        let booking = Booking {
            id: Ulid::new(),
            booking_type: input.booking_type,
            resource_id: input.resource_id,
            user_id: input.user_id,
            start_date: span.start,
            end_date: span.end,
            guests: input.guests,
            total_price,
            status: BookingStatus::Pending,
            contact_info: input.contact_info,
            special_requests: input
                .special_requests
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        // Past this point the reservation and its compensation must not be cut short by
        // a dropped caller, so the rest runs as its own task.
        let commit = commit_new(
            self.index.clone(),
            self.store.clone(),
            booking,
            self.config.auto_confirm,
            today,
            now,
        );
        tokio::spawn(commit).await.map_err(task_failed)?
    }

    /// Move a `pending` booking to `confirmed`. Only the listing's owner or an admin may.
    pub async fn confirm_booking(
        &self,
        id: BookingId,
        requester: &Requester,
    ) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.confirm_inner(id, requester).await;
        observability::record_outcome("confirm", started, &result);
        if result.is_ok() {
            info!("booking {id} confirmed by {}", requester.user_id);
        }
        result
    }

    async fn confirm_inner(
        &self,
        id: BookingId,
        requester: &Requester,
    ) -> Result<Booking, BookingError> {
        let booking = self.store.get(id).await?.ok_or(BookingError::NotFound(id))?;
        if !self.may_confirm(&booking, requester).await? {
            return Err(BookingError::Forbidden(id));
        }
        transition(
            self.store.as_ref(),
            &booking,
            BookingStatus::Confirmed,
            None,
            self.clock.now(),
        )
        .await
    }

    /// Cancel a `pending` or `confirmed` booking and free its dates.
    ///
    /// The status change is persisted before the interval is released. If the release
    /// then fails the booking stays cancelled and [`BookingError::HeldIntervalLeak`] is
    /// returned so the leak can be reconciled.
    pub async fn cancel_booking(
        &self,
        id: BookingId,
        requester: &Requester,
        reason: Option<String>,
    ) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.cancel_inner(id, requester, reason).await;
        observability::record_outcome("cancel", started, &result);
        if result.is_ok() {
            info!("booking {id} cancelled by {}", requester.user_id);
        }
        result
    }

    async fn cancel_inner(
        &self,
        id: BookingId,
        requester: &Requester,
        reason: Option<String>,
    ) -> Result<Booking, BookingError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if let Some(r) = &reason
            && r.chars().count() > MAX_REASON_LEN
        {
            return Err(BookingError::field(
                "cancellation_reason",
                "length",
                format!("at most {MAX_REASON_LEN} characters"),
            ));
        }

        let booking = self.store.get(id).await?.ok_or(BookingError::NotFound(id))?;
        if !self.may_cancel(&booking, requester).await? {
            return Err(BookingError::Forbidden(id));
        }
        let booking = self.settle(booking).await?;
        if booking.status.is_terminal() {
            return Err(BookingError::InvalidStateTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let commit = commit_cancel(
            self.index.clone(),
            self.store.clone(),
            booking,
            reason,
            self.clock.now(),
        );
        tokio::spawn(commit).await.map_err(task_failed)?
    }
}

fn check_listing(
    key: &ResourceKey,
    info: &ResourceInfo,
    input: &NewBooking,
) -> Result<(), BookingError> {
    if !info.is_active {
        return Err(BookingError::ResourceInactive {
            kind: input.booking_type,
            id: input.resource_id.clone(),
        });
    }
    if info.unit_kind != input.booking_type.unit_kind() {
        return Err(CatalogError::Inconsistent(key.clone(), "unit kind does not match listing type").into());
    }
    if let Some(capacity) = info.capacity
        && input.guests > capacity
    {
        return Err(BookingError::field(
            "guests",
            "capacity",
            format!("{key} takes at most {capacity} guests"),
        ));
    }
    Ok(())
}

async fn commit_new(
    index: Arc<AvailabilityIndex>,
    store: Arc<dyn BookingStore>,
    booking: Booking,
    auto_confirm: bool,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    let key = booking.resource_key();
    let pruned = index
        .reserve(&key, booking.span(), booking.id, today)
        .await
        .map_err(|e| availability_error(&key, e))?;
    metrics::gauge!(observability::HELD_INTERVALS).increment(1.0 - pruned as f64);

    if let Err(e) = store.insert(&booking).await {
        return Err(compensate(&index, &key, booking.id, e.into()).await);
    }
    if !auto_confirm {
        return Ok(booking);
    }
    match transition(store.as_ref(), &booking, BookingStatus::Confirmed, None, now).await {
        Ok(confirmed) => Ok(confirmed),
        Err(e) => {
            warn!("booking {} stored but not auto-confirmed: {e}", booking.id);
            Ok(booking)
        }
    }
}

async fn commit_cancel(
    index: Arc<AvailabilityIndex>,
    store: Arc<dyn BookingStore>,
    booking: Booking,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    let cancelled = transition(store.as_ref(), &booking, BookingStatus::Cancelled, reason, now).await?;
    release_or_leak(&index, &booking.resource_key(), booking.id).await?;
    Ok(cancelled)
}

/// Compare-and-set `booking` from its current status to `to`. A lost race is reported
/// against the status the record actually has.
async fn transition(
    store: &dyn BookingStore,
    booking: &Booking,
    to: BookingStatus,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    if !booking.status.can_transition_to(to) {
        return Err(BookingError::InvalidStateTransition {
            from: booking.status,
            to,
        });
    }
    let change = StatusUpdate { status: to, reason, at };
    match store.update(booking.id, booking.status, change).await {
        Ok(b) => Ok(b),
        Err(StoreError::StatusMismatch { actual, .. }) => {
            Err(BookingError::InvalidStateTransition { from: actual, to })
        }
        Err(StoreError::Missing(id)) => Err(BookingError::NotFound(id)),
        Err(e) => Err(e.into()),
    }
}

fn task_failed(e: JoinError) -> BookingError {
    StoreError::Unavailable(format!("booking task failed: {e}")).into()
}
