use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::{MAX_PAGE_LIMIT_CEILING, MAX_SPAN_DAYS_CEILING};
use crate::pricing::PricingStrategy;

/// Knobs of the booking lifecycle.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// Longest bookable range in days.
    pub max_span_days: i64,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    /// Move new bookings straight to `confirmed`.
    pub auto_confirm: bool,
    pub pricing: PricingStrategy,
    /// Upper bound on waiting for a resource's schedule lock.
    pub lock_timeout: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_span_days: 30,
            default_page_limit: 10,
            max_page_limit: 100,
            auto_confirm: false,
            pricing: PricingStrategy::PerUnit,
            lock_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    /// JSON seed file for the in-memory catalog.
    pub catalog_path: Option<PathBuf>,
    pub booking: BookingConfig,
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = BookingConfig::default();

        let pricing = match lookup("WAYSTAY_PRICING") {
            Some(s) => s.parse::<PricingStrategy>().unwrap_or_else(|e| {
                tracing::warn!("{e}, using per_unit");
                PricingStrategy::PerUnit
            }),
            None => defaults.pricing,
        };

        let max_page_limit: u32 = parse_var(&lookup, "WAYSTAY_MAX_PAGE_LIMIT")
            .unwrap_or(defaults.max_page_limit)
            .clamp(1, MAX_PAGE_LIMIT_CEILING);
        let default_page_limit: u32 = parse_var(&lookup, "WAYSTAY_DEFAULT_PAGE_LIMIT")
            .unwrap_or(defaults.default_page_limit)
            .clamp(1, max_page_limit);

        let booking = BookingConfig {
            max_span_days: parse_var(&lookup, "WAYSTAY_MAX_SPAN_DAYS")
                .unwrap_or(defaults.max_span_days)
                .clamp(1, MAX_SPAN_DAYS_CEILING),
            default_page_limit,
            max_page_limit,
            auto_confirm: lookup("WAYSTAY_AUTO_CONFIRM")
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.auto_confirm),
            pricing,
            lock_timeout: parse_var(&lookup, "WAYSTAY_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
        };

        Self {
            data_dir: PathBuf::from(lookup("WAYSTAY_DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port: parse_var(&lookup, "WAYSTAY_METRICS_PORT"),
            compact_threshold: parse_var(&lookup, "WAYSTAY_COMPACT_THRESHOLD").unwrap_or(1000),
            catalog_path: lookup("WAYSTAY_CATALOG").map(PathBuf::from),
            booking,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
