use std::str::FromStr;

use crate::model::Amount;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("unit price must be positive, got {0}")]
    NonPositiveUnitPrice(Amount),
    #[error("unit count must be at least 1, got {0}")]
    NonPositiveUnitCount(i64),
    #[error("guest count must be at least 1")]
    NoGuests,
    #[error("price overflows")]
    Overflow,
}

/// `unit_price * unit_count`. Both must be positive so the result is too.
pub fn compute_price(unit_price: Amount, unit_count: i64) -> Result<Amount, PricingError> {
    if unit_price <= 0 {
        return Err(PricingError::NonPositiveUnitPrice(unit_price));
    }
    if unit_count < 1 {
        return Err(PricingError::NonPositiveUnitCount(unit_count));
    }
    unit_price
        .checked_mul(unit_count)
        .ok_or(PricingError::Overflow)
}

/// How guests factor into the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PricingStrategy {
    /// Nights × nightly rate, or days × daily rate. Guests only count against capacity.
    #[default]
    PerUnit,
    /// Rate × units × guests.
    PerGuest,
}

impl PricingStrategy {
    pub fn price(self, unit_price: Amount, unit_count: i64, guests: u32) -> Result<Amount, PricingError> {
        let base = compute_price(unit_price, unit_count)?;
        match self {
            PricingStrategy::PerUnit => Ok(base),
            PricingStrategy::PerGuest => {
                if guests == 0 {
                    return Err(PricingError::NoGuests);
                }
                base.checked_mul(Amount::from(guests))
                    .ok_or(PricingError::Overflow)
            }
        }
    }
}

impl FromStr for PricingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_unit" | "unit" => Ok(PricingStrategy::PerUnit),
            "per_guest" | "guest" => Ok(PricingStrategy::PerGuest),
            other => Err(format!("unknown pricing strategy: {other}")),
        }
    }
}
