//! Test utilities shared by the integration tests.
//!
//! Provides in-memory SQLite databases with migrations applied plus order,
//! routing and provider fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use smm_dispatch::config::provider::{KEY_API_KEY, KEY_API_URL};
use smm_dispatch::config::{IngestionConfig, StaticConfigProvider, WorkerConfig};
use smm_dispatch::ingestion::IngestionService;
use smm_dispatch::models::smm_job::TargetKind;
use smm_dispatch::orders::{InMemoryOrderSource, LineItem, MetaEntry, Order, OrderSource};
use smm_dispatch::repositories::{JobRepository, NewJob, RetryPolicy};
use smm_dispatch::routing::{LogicType, RoutingConfig, RoutingTable};
use smm_dispatch::worker::RetryWorker;

pub const API_KEY: &str = "test-key";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Worker settings for tests: no pauses, immediate retries.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        backoff_seconds: 0,
        inter_job_delay_ms: 0,
        ..WorkerConfig::default()
    }
}

pub fn job_repo(db: &DatabaseConnection, config: &WorkerConfig) -> JobRepository {
    JobRepository::new(db.clone(), RetryPolicy::from(config))
}

/// Routing: product 10 by identifier (service 4420), product 20 by link set (service 5510).
pub fn routing_table() -> RoutingTable {
    RoutingTable::default()
        .with_product(
            10,
            RoutingConfig {
                service_id: Some("4420".to_string()),
                logic_type: LogicType::ByIdentifier,
                ..RoutingConfig::default()
            },
        )
        .with_product(
            20,
            RoutingConfig {
                service_id: Some("5510".to_string()),
                logic_type: LogicType::ByLinkSet,
                ..RoutingConfig::default()
            },
        )
}

pub fn identifier_order(order_id: i64, username: &str, quantity: i64) -> Order {
    Order {
        id: order_id,
        status: "processing".to_string(),
        region: None,
        meta: Vec::new(),
        line_items: vec![LineItem {
            id: 1,
            product_id: 10,
            variation_id: None,
            quantity,
            meta: vec![MetaEntry::new("username", username)],
        }],
    }
}

pub fn link_set_order(order_id: i64, links: &str, quantity: i64) -> Order {
    Order {
        id: order_id,
        status: "processing".to_string(),
        region: None,
        meta: Vec::new(),
        line_items: vec![LineItem {
            id: 1,
            product_id: 20,
            variation_id: None,
            quantity,
            meta: vec![MetaEntry::new("post_links", links)],
        }],
    }
}

/// Provider settings pointing at a mock panel.
pub fn provider_config(api_url: &str) -> StaticConfigProvider {
    StaticConfigProvider::new()
        .with(KEY_API_URL, api_url)
        .with(KEY_API_KEY, API_KEY)
}

/// Wired ingestion + worker over one database and order source.
pub struct Pipeline {
    pub jobs: JobRepository,
    pub orders: Arc<InMemoryOrderSource>,
    pub ingestion: IngestionService,
    pub worker: RetryWorker,
}

impl Pipeline {
    pub fn new(db: &DatabaseConnection, api_url: &str, config: WorkerConfig) -> Self {
        let jobs = job_repo(db, &config);
        let orders = Arc::new(InMemoryOrderSource::new(IngestionConfig::default()));

        // Ingest with no initial delay so jobs are due right away.
        let ingestion = IngestionService::new(
            jobs.clone(),
            Arc::new(routing_table()),
            orders.clone(),
            IngestionConfig::default(),
            Duration::zero(),
        );

        let worker = RetryWorker::new(
            jobs.clone(),
            orders.clone(),
            Arc::new(provider_config(api_url)),
            config,
        );

        Self {
            jobs,
            orders,
            ingestion,
            worker,
        }
    }

    /// Remember the order and ingest it.
    pub async fn ingest(&self, order: Order) -> Vec<Uuid> {
        self.orders.remember(order.clone()).await;
        self.ingestion.ingest(&order).await.job_ids
    }
}

/// Insert a due identifier job directly.
pub async fn insert_due_job(
    jobs: &JobRepository,
    order_id: i64,
    line_item_id: i64,
) -> Result<Uuid> {
    let (id, inserted) = jobs
        .insert_if_absent(NewJob {
            order_id,
            line_item_id,
            product_id: 10,
            target_kind: TargetKind::Username,
            target_value: "alice_ig".to_string(),
            quantity: 50,
            multiplier: 1,
            service_id: Some("4420".to_string()),
            next_attempt_at: (Utc::now() - Duration::seconds(1)).fixed_offset(),
        })
        .await?;
    assert!(inserted);
    Ok(id)
}
