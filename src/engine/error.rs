use std::fmt;

use validator::{ValidationErrors, ValidationErrorsKind};

use crate::catalog::CatalogError;
use crate::model::{BookingId, BookingStatus, BookingType, ResourceKey};
use crate::pricing::PricingError;

use super::store::StoreError;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path, e.g. `contact_info.email`.
    pub field: String,
    pub code: String,
    pub message: Option<String>,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(m) => write!(f, "{}: {} ({m})", self.field, self.code),
            None => write!(f, "{}: {}", self.field, self.code),
        }
    }
}

fn flatten_into(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    out.push(FieldError {
                        field: path.clone(),
                        code: e.code.to_string(),
                        message: e.message.as_ref().map(|m| m.to_string()),
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten_into(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    flatten_into(&format!("{path}[{idx}]"), inner, out);
                }
            }
        }
    }
}

/// Flatten `validator` output into a sorted list of field errors.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    flatten_into("", errors, &mut out);
    out.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.code.cmp(&b.code)));
    out
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<FieldError>),
    #[error("{kind} {id} not found")]
    ResourceNotFound { kind: BookingType, id: String },
    #[error("{kind} {id} is not accepting bookings")]
    ResourceInactive { kind: BookingType, id: String },
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("dates unavailable: conflicts with booking {conflicting}")]
    BookingConflict { conflicting: BookingId },
    #[error("cannot move booking from {from} to {to}")]
    InvalidStateTransition { from: BookingStatus, to: BookingStatus },
    #[error("not allowed to modify booking {0}")]
    Forbidden(BookingId),
    #[error("booking {0} not found")]
    NotFound(BookingId),
    #[error("invalid input: {0}")]
    InvalidInput(#[from] PricingError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("catalog failure: {0}")]
    Catalog(#[from] CatalogError),
    #[error("{0} cannot take more bookings")]
    ResourceFull(ResourceKey),
    #[error("schedule for {0} is busy")]
    IndexBusy(ResourceKey),
    /// A hold could not be released after a failed write. Needs reconciliation.
    #[error("interval for booking {booking_id} on {resource} leaked: {cause}")]
    HeldIntervalLeak {
        booking_id: BookingId,
        resource: ResourceKey,
        cause: Box<BookingError>,
    },
}

impl BookingError {
    pub fn field(field: &str, code: &str, message: impl Into<String>) -> Self {
        BookingError::Validation(vec![FieldError::new(field, code).with_message(message)])
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation",
            BookingError::ResourceNotFound { .. } => "resource_not_found",
            BookingError::ResourceInactive { .. } => "resource_inactive",
            BookingError::InvalidDateRange(_) => "invalid_date_range",
            BookingError::BookingConflict { .. } => "conflict",
            BookingError::InvalidStateTransition { .. } => "invalid_state_transition",
            BookingError::Forbidden(_) => "forbidden",
            BookingError::NotFound(_) => "not_found",
            BookingError::InvalidInput(_) => "invalid_input",
            BookingError::Persistence(_) => "persistence",
            BookingError::Catalog(_) => "catalog",
            BookingError::ResourceFull(_) => "resource_full",
            BookingError::IndexBusy(_) => "index_busy",
            BookingError::HeldIntervalLeak { .. } => "held_interval_leak",
        }
    }
}

impl From<ValidationErrors> for BookingError {
    fn from(errors: ValidationErrors) -> Self {
        BookingError::Validation(field_errors(&errors))
    }
}
