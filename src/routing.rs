//! Product routing: which provider service a product maps to and how its
//! delivery target is derived.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::smm_job::TargetKind;
use crate::orders::LineItem;

/// How a product's delivery target is derived from the order item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogicType {
    /// Deliver to one identifier (username or single link)
    #[default]
    #[serde(alias = "by-identifier", alias = "username")]
    ByIdentifier,
    /// Split the quantity across links found in the item annotations
    #[serde(alias = "by-link-set", alias = "links")]
    ByLinkSet,
}

impl From<LogicType> for TargetKind {
    fn from(logic: LogicType) -> Self {
        match logic {
            LogicType::ByIdentifier => TargetKind::Username,
            LogicType::ByLinkSet => TargetKind::LinkSet,
        }
    }
}

/// Effective routing for one product or variation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub logic_type: LogicType,
    /// Region code (billing country) to service id
    #[serde(default)]
    pub region_overrides: BTreeMap<String, String>,
}

impl RoutingConfig {
    /// Service id for an order placed from `region`; overrides match case-insensitively.
    pub fn service_for_region(&self, region: Option<&str>) -> Option<String> {
        let region_override = region.and_then(|region| {
            let region = region.trim();
            self.region_overrides
                .iter()
                .find(|(code, _)| code.eq_ignore_ascii_case(region))
                .map(|(_, service)| service.trim())
        });

        region_override
            .or(self.service_id.as_deref().map(str::trim))
            .filter(|service| !service.is_empty())
            .map(str::to_string)
    }
}

/// Lookup consumed by ingestion.
pub trait RoutingResolver: Send + Sync {
    fn resolve_routing(&self, product_id: i64) -> Option<RoutingConfig>;

    /// Routing for a purchased item. A variation without an entry of its
    /// own falls back to its parent product.
    fn resolve_item(&self, item: &LineItem) -> Option<RoutingConfig> {
        item.variation_id
            .and_then(|variation| self.resolve_routing(variation))
            .or_else(|| self.resolve_routing(item.product_id))
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("failed to read routing file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid routing table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("variation {variation} points to unknown parent product {parent}")]
    UnknownParent { variation: i64, parent: i64 },
}

#[derive(Debug, Clone, Deserialize)]
struct ProductEntry {
    id: i64,
    #[serde(flatten)]
    routing: RoutingConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct VariationEntry {
    id: i64,
    parent_id: i64,
    #[serde(default)]
    service_id: Option<String>,
    #[serde(default)]
    logic_type: Option<LogicType>,
    #[serde(default)]
    region_overrides: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingFile {
    #[serde(default)]
    products: Vec<ProductEntry>,
    #[serde(default)]
    variations: Vec<VariationEntry>,
}

/// Routing table loaded from JSON:
///
/// ```json
/// {
///   "products": [{"id": 10, "service_id": "4420", "logic_type": "by_identifier"}],
///   "variations": [{"id": 11, "parent_id": 10, "region_overrides": {"DE": "4421"}}]
/// }
/// ```
///
/// Variations inherit every field they do not set from their parent.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    products: HashMap<i64, RoutingConfig>,
}

impl RoutingTable {
    pub fn from_json(raw: &str) -> Result<Self, RoutingError> {
        let file: RoutingFile = serde_json::from_str(raw)?;

        let mut products: HashMap<i64, RoutingConfig> = file
            .products
            .into_iter()
            .map(|entry| (entry.id, entry.routing))
            .collect();

        for variation in file.variations {
            let parent = products.get(&variation.parent_id).cloned().ok_or(
                RoutingError::UnknownParent {
                    variation: variation.id,
                    parent: variation.parent_id,
                },
            )?;

            let resolved = RoutingConfig {
                service_id: variation
                    .service_id
                    .filter(|service| !service.trim().is_empty())
                    .or(parent.service_id),
                logic_type: variation.logic_type.unwrap_or(parent.logic_type),
                region_overrides: variation
                    .region_overrides
                    .unwrap_or(parent.region_overrides),
            };
            products.insert(variation.id, resolved);
        }

        Ok(Self { products })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RoutingError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RoutingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            products = table.products.len(),
            "Loaded product routing table"
        );
        Ok(table)
    }

    /// Add or replace one product's routing.
    pub fn with_product(mut self, product_id: i64, routing: RoutingConfig) -> Self {
        self.products.insert(product_id, routing);
        self
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl RoutingResolver for RoutingTable {
    fn resolve_routing(&self, product_id: i64) -> Option<RoutingConfig> {
        self.products.get(&product_id).cloned()
    }
}
