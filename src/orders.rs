//! Order payloads delivered by the host storefront, and the source the
//! worker and bulk reset read them back from.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::config::IngestionConfig;

/// Annotation fields holding a single delivery identifier, in lookup order.
pub const IDENTIFIER_FIELDS: &[&str] = &["username", "target", "profile", "link"];

/// One `key = value` annotation on an order or line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

impl MetaEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A purchased line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LineItem {
    pub id: i64,
    pub product_id: i64,
    /// Set when the item was bought as a product variation
    #[serde(default)]
    pub variation_id: Option<i64>,
    pub quantity: i64,
    #[serde(default)]
    pub meta: Vec<MetaEntry>,
}

impl LineItem {
    /// Most specific product id: the variation when the item was bought as one.
    pub fn routing_product_id(&self) -> i64 {
        self.variation_id.unwrap_or(self.product_id)
    }
}

/// Snapshot of a host order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: i64,
    pub status: String,
    /// Billing country, used for region-specific service overrides
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub meta: Vec<MetaEntry>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl Order {
    pub fn line_item(&self, line_item_id: i64) -> Option<&LineItem> {
        self.line_items.iter().find(|item| item.id == line_item_id)
    }
}

/// Order lifecycle transition pushed by the host.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderEvent {
    pub order_id: i64,
    pub status: String,
    /// Full order snapshot; when absent the order is looked up in the source
    #[serde(default)]
    pub order: Option<Order>,
}

/// Drip-feed parameters forwarded on `add`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DripFeed {
    pub runs: Option<u32>,
    pub interval: Option<u32>,
    pub comments: Option<String>,
}

/// Read-only view over an item's annotations, falling back to the order's.
#[derive(Debug, Clone, Copy)]
pub struct Annotations<'a> {
    item: &'a [MetaEntry],
    order: &'a [MetaEntry],
}

impl<'a> Annotations<'a> {
    pub fn new(order: &'a Order, item: &'a LineItem) -> Self {
        Self {
            item: &item.meta,
            order: &order.meta,
        }
    }

    /// All non-empty values of `key` on the item, in annotation order.
    pub fn item_values(&self, key: &str) -> impl Iterator<Item = &'a str> {
        self.item
            .iter()
            .filter(move |entry| entry.key.trim().eq_ignore_ascii_case(key))
            .map(|entry| entry.value.trim())
            .filter(|value| !value.is_empty())
    }

    fn first(entries: &'a [MetaEntry], key: &str) -> Option<&'a str> {
        entries
            .iter()
            .filter(|entry| entry.key.trim().eq_ignore_ascii_case(key))
            .map(|entry| entry.value.trim())
            .find(|value| !value.is_empty())
    }

    /// Item value for `key`, else the order's.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        Self::first(self.item, key).or_else(|| Self::first(self.order, key))
    }

    /// First non-empty identifier field on the item.
    pub fn identifier(&self) -> Option<&'a str> {
        IDENTIFIER_FIELDS
            .iter()
            .find_map(|field| Self::first(self.item, field))
    }

    pub fn quantity_override(&self) -> Option<i64> {
        Self::first(self.item, "quantity")
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|quantity| *quantity > 0)
    }

    /// Multiplier annotation; item level wins over order level, default 1.
    pub fn multiplier(&self) -> Option<i32> {
        self.get("multiplier")
            .and_then(|value| value.parse::<i32>().ok())
            .filter(|multiplier| *multiplier >= 1)
    }

    pub fn drip_feed(&self) -> DripFeed {
        DripFeed {
            runs: self.get("runs").and_then(|v| v.parse().ok()),
            interval: self.get("interval").and_then(|v| v.parse().ok()),
            comments: self.get("comments").map(str::to_string),
        }
    }
}

/// Where the core reads orders back from after the original event.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_order(&self, order_id: i64) -> Option<Order>;

    /// Orders currently in a confirmed status.
    async fn backlog(&self) -> Vec<Order>;

    /// Keep the latest snapshot delivered with an event. Sources backed by
    /// the host's own storage can ignore this.
    async fn remember(&self, _order: Order) {}
}

/// Order source holding the latest snapshot of every order seen.
pub struct InMemoryOrderSource {
    confirmed: IngestionConfig,
    orders: RwLock<BTreeMap<i64, Order>>,
}

impl InMemoryOrderSource {
    pub fn new(confirmed: IngestionConfig) -> Self {
        Self {
            confirmed,
            orders: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl OrderSource for InMemoryOrderSource {
    async fn fetch_order(&self, order_id: i64) -> Option<Order> {
        self.orders.read().await.get(&order_id).cloned()
    }

    async fn backlog(&self) -> Vec<Order> {
        self.orders
            .read()
            .await
            .values()
            .filter(|order| self.confirmed.is_confirmed(&order.status))
            .cloned()
            .collect()
    }

    async fn remember(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order {
            id: 100,
            status: "processing".to_string(),
            region: Some("US".to_string()),
            meta: vec![
                MetaEntry::new("multiplier", "2"),
                MetaEntry::new("comments", "nice"),
            ],
            line_items: vec![LineItem {
                id: 1,
                product_id: 10,
                variation_id: None,
                quantity: 50,
                meta: vec![
                    MetaEntry::new("Username", "  "),
                    MetaEntry::new("profile", "alice_ig"),
                    MetaEntry::new("runs", "3"),
                ],
            }],
        }
    }

    #[test]
    fn identifier_skips_blank_fields() {
        let order = order();
        let annotations = Annotations::new(&order, &order.line_items[0]);
        assert_eq!(annotations.identifier(), Some("alice_ig"));
    }

    #[test]
    fn item_multiplier_wins_over_order() {
        let mut order = order();
        assert_eq!(
            Annotations::new(&order, &order.line_items[0]).multiplier(),
            Some(2)
        );

        order.line_items[0]
            .meta
            .push(MetaEntry::new("multiplier", "3"));
        assert_eq!(
            Annotations::new(&order, &order.line_items[0]).multiplier(),
            Some(3)
        );
    }

    #[test]
    fn drip_feed_reads_both_levels() {
        let order = order();
        let drip = Annotations::new(&order, &order.line_items[0]).drip_feed();
        assert_eq!(drip.runs, Some(3));
        assert_eq!(drip.interval, None);
        assert_eq!(drip.comments.as_deref(), Some("nice"));
    }

    #[tokio::test]
    async fn backlog_only_returns_confirmed_orders() {
        let source = InMemoryOrderSource::new(IngestionConfig::default());
        source.remember(order()).await;
        source
            .remember(Order {
                id: 101,
                status: "on-hold".to_string(),
                region: None,
                meta: vec![],
                line_items: vec![],
            })
            .await;

        let backlog = source.backlog().await;
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, 100);
        assert!(source.fetch_order(101).await.is_some());
    }
}
