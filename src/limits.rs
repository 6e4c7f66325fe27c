//! Hard bounds on input sizes. Field-level bounds that `validator` checks live on
//! [`crate::model::NewBooking`]; these cover everything else.

/// Longest accepted cancellation reason, in characters.
pub const MAX_REASON_LEN: usize = 500;

/// Per-resource interval cap. A resource holding this many live bookings rejects new ones.
pub const MAX_INTERVALS_PER_RESOURCE: usize = 10_000;

/// Upper bound for `max_span_days` coming from configuration.
pub const MAX_SPAN_DAYS_CEILING: i64 = 366;

/// Upper bound for `max_page_limit` coming from configuration.
pub const MAX_PAGE_LIMIT_CEILING: u32 = 1_000;

/// Largest catalog seed file accepted at startup.
pub const MAX_CATALOG_FILE_BYTES: u64 = 16 * 1024 * 1024;
