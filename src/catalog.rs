use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::limits::MAX_CATALOG_FILE_BYTES;
use crate::model::{Amount, BookingType, ResourceKey, UnitKind};

/// What the booking core needs to know about a homestay or guide.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub pricing_unit: Amount,
    pub unit_kind: UnitKind,
    pub is_active: bool,
    #[serde(default)]
    pub capacity: Option<u32>,
    /// Host or guide account that owns the listing.
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("catalog entry {0} is inconsistent: {1}")]
    Inconsistent(ResourceKey, &'static str),
    #[error("catalog seed: {0}")]
    Seed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read-only lookup into the homestay / guide listings.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn lookup(
        &self,
        kind: BookingType,
        resource_id: &str,
    ) -> Result<Option<ResourceInfo>, CatalogError>;
}

/// One entry of a catalog seed file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedEntry {
    resource_type: BookingType,
    resource_id: String,
    #[serde(flatten)]
    info: ResourceInfo,
}

/// Catalog held in memory. Used by the standalone host and by tests.
#[derive(Default)]
pub struct InMemoryCatalog {
    resources: DashMap<ResourceKey, ResourceInfo>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: BookingType, resource_id: impl Into<String>, info: ResourceInfo) {
        self.resources.insert(ResourceKey::new(kind, resource_id), info);
    }

    /// Mark a listing inactive. Returns false if it was never registered.
    pub fn deactivate(&self, kind: BookingType, resource_id: &str) -> bool {
        let key = ResourceKey::new(kind, resource_id);
        match self.resources.get_mut(&key) {
            Some(mut info) => {
                info.is_active = false;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Parse a JSON array of `{resourceType, resourceId, pricingUnit, unitKind, isActive, ...}`.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<SeedEntry> =
            serde_json::from_str(json).map_err(|e| CatalogError::Seed(e.to_string()))?;
        let catalog = Self::new();
        for entry in entries {
            if entry.info.pricing_unit <= 0 {
                return Err(CatalogError::Seed(format!(
                    "{}/{}: pricingUnit must be positive",
                    entry.resource_type, entry.resource_id
                )));
            }
            catalog.insert(entry.resource_type, entry.resource_id, entry.info);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let len = std::fs::metadata(path)?.len();
        if len > MAX_CATALOG_FILE_BYTES {
            return Err(CatalogError::Seed(format!("{} is too large", path.display())));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryCatalog {
    async fn lookup(
        &self,
        kind: BookingType,
        resource_id: &str,
    ) -> Result<Option<ResourceInfo>, CatalogError> {
        let key = ResourceKey::new(kind, resource_id);
        Ok(self.resources.get(&key).map(|e| e.value().clone()))
    }
}
