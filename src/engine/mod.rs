mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{subtract_intervals, AvailabilityError, AvailabilityIndex, SharedSchedule};
pub use error::{field_errors, BookingError, FieldError};
pub use store::{BookingStore, InMemoryStore, SharedBooking, StatusUpdate, StoreError, WalStore};

use std::sync::Arc;

use tracing::{error, info};

use crate::catalog::ResourceCatalog;
use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::model::*;

/// Owns the booking lifecycle: validation, reservation, pricing and status changes.
///
/// Store, catalog and clock are injected so tests can run against isolated instances.
pub struct BookingManager {
    pub(super) store: Arc<dyn BookingStore>,
    pub(super) catalog: Arc<dyn ResourceCatalog>,
    pub(super) index: Arc<AvailabilityIndex>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: BookingConfig,
}

impl BookingManager {
    /// Build a manager and rebuild the availability index from the store's live bookings.
    pub async fn new(
        store: Arc<dyn BookingStore>,
        catalog: Arc<dyn ResourceCatalog>,
        clock: Arc<dyn Clock>,
        config: BookingConfig,
    ) -> Result<Self, BookingError> {
        let index = Arc::new(AvailabilityIndex::new(config.lock_timeout));
        let active = store.active().await?;
        let held = index
            .rebuild(active.iter(), clock.today())
            .await
            .map_err(|(id, e)| index_error(id, &active, e))?;
        info!(
            "availability index rebuilt: {held} intervals across {} resources",
            index.resource_count()
        );
        metrics::gauge!(crate::observability::HELD_INTERVALS).set(held as f64);

        Ok(Self {
            store,
            catalog,
            index,
            clock,
            config,
        })
    }

    pub fn availability(&self) -> &Arc<AvailabilityIndex> {
        &self.index
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Customer who made the booking, the listing's owner, or an admin.
    pub(super) async fn may_cancel(&self, booking: &Booking, requester: &Requester) -> Result<bool, BookingError> {
        if requester.user_id == booking.user_id || requester.role == Role::Admin {
            return Ok(true);
        }
        self.is_owner(booking, requester).await
    }

    /// Listing's owner or an admin. Customers cannot confirm their own bookings.
    pub(super) async fn may_confirm(&self, booking: &Booking, requester: &Requester) -> Result<bool, BookingError> {
        if requester.role == Role::Admin {
            return Ok(true);
        }
        self.is_owner(booking, requester).await
    }

    async fn is_owner(&self, booking: &Booking, requester: &Requester) -> Result<bool, BookingError> {
        if !matches!(requester.role, Role::Host | Role::Guide) {
            return Ok(false);
        }
        let info = self
            .catalog
            .lookup(booking.booking_type, &booking.resource_id)
            .await?;
        Ok(info
            .and_then(|i| i.owner_id)
            .is_some_and(|owner| owner == requester.user_id))
    }
}

/// Release a booking's interval, reporting a failure as a leak.
pub(super) async fn release_or_leak(
    index: &AvailabilityIndex,
    key: &ResourceKey,
    booking_id: BookingId,
) -> Result<(), BookingError> {
    match index.release(key, booking_id).await {
        Ok(released) => {
            if released {
                metrics::gauge!(crate::observability::HELD_INTERVALS).decrement(1.0);
            }
            Ok(())
        }
        Err(e) => Err(leak(key, booking_id, availability_error(key, e))),
    }
}

/// Undo a reservation after a later step failed with `cause`. Returns `cause` when the
/// interval was released and a leak report when it was not.
pub(super) async fn compensate(
    index: &AvailabilityIndex,
    key: &ResourceKey,
    booking_id: BookingId,
    cause: BookingError,
) -> BookingError {
    match index.release(key, booking_id).await {
        Ok(released) => {
            if released {
                metrics::gauge!(crate::observability::HELD_INTERVALS).decrement(1.0);
            }
            cause
        }
        Err(_) => leak(key, booking_id, cause),
    }
}

fn leak(key: &ResourceKey, booking_id: BookingId, cause: BookingError) -> BookingError {
    error!("interval for booking {booking_id} on {key} leaked, needs reconciliation: {cause}");
    metrics::counter!(crate::observability::HELD_INTERVAL_LEAKS_TOTAL).increment(1);
    BookingError::HeldIntervalLeak {
        booking_id,
        resource: key.clone(),
        cause: Box::new(cause),
    }
}

pub(super) fn availability_error(key: &ResourceKey, e: AvailabilityError) -> BookingError {
    match e {
        AvailabilityError::Conflict(conflicting) => BookingError::BookingConflict { conflicting },
        AvailabilityError::LockTimeout(_) => BookingError::IndexBusy(key.clone()),
        AvailabilityError::Full(k) => BookingError::ResourceFull(k),
    }
}

fn index_error(id: BookingId, active: &[Booking], e: AvailabilityError) -> BookingError {
    let key = active
        .iter()
        .find(|b| b.id == id)
        .map(Booking::resource_key);
    match key {
        Some(key) => {
            error!("stored booking {id} cannot be placed on {key}: {e}");
            availability_error(&key, e)
        }
        None => BookingError::NotFound(id),
    }
}
