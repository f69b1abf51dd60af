//! Routing table files and their effect on ingested jobs.

mod test_utils;

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use tempfile::TempDir;

use smm_dispatch::config::{IngestionConfig, WorkerConfig};
use smm_dispatch::ingestion::IngestionService;
use smm_dispatch::models::smm_job::TargetKind;
use smm_dispatch::orders::InMemoryOrderSource;
use smm_dispatch::routing::{RoutingError, RoutingResolver, RoutingTable};
use test_utils::{identifier_order, job_repo, link_set_order, setup_test_db};

const ROUTING: &str = r#"{
    "products": [
        {"id": 10, "service_id": "4420", "region_overrides": {"DE": "4421"}},
        {"id": 20, "service_id": "5510", "logic_type": "by_link_set"}
    ],
    "variations": [
        {"id": 12, "parent_id": 10, "service_id": "4430"}
    ]
}"#;

fn write_routing(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("routing.json");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_table_from_file() {
    let dir = TempDir::new().unwrap();
    let table = RoutingTable::from_path(write_routing(&dir, ROUTING)).unwrap();

    assert_eq!(table.len(), 3);
    let variation = table.resolve_routing(12).unwrap();
    assert_eq!(variation.service_id.as_deref(), Some("4430"));
    assert_eq!(variation.region_overrides.get("DE").map(String::as_str), Some("4421"));
}

#[test]
fn missing_and_malformed_files_are_errors() {
    let dir = TempDir::new().unwrap();

    let err = RoutingTable::from_path(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, RoutingError::Io { .. }));

    let err = RoutingTable::from_path(write_routing(&dir, "{ not json")).unwrap_err();
    assert!(matches!(err, RoutingError::Parse(_)));
}

#[tokio::test]
async fn ingestion_routes_by_variation_and_region() -> Result<()> {
    let dir = TempDir::new()?;
    let table = RoutingTable::from_path(write_routing(&dir, ROUTING))?;

    let db = setup_test_db().await?;
    let jobs = job_repo(&db, &WorkerConfig::default());
    let ingestion = IngestionService::new(
        jobs.clone(),
        Arc::new(table),
        Arc::new(InMemoryOrderSource::new(IngestionConfig::default())),
        IngestionConfig::default(),
        Duration::seconds(120),
    );

    let mut german = identifier_order(100, "alice_ig", 50);
    german.region = Some("de".to_string());
    let mut variation = identifier_order(101, "bob_ig", 30);
    variation.line_items[0].variation_id = Some(12);

    let german_id = ingestion.ingest(&german).await.job_ids[0];
    let variation_id = ingestion.ingest(&variation).await.job_ids[0];

    let german_job = jobs.find(german_id).await?.expect("job exists");
    assert_eq!(german_job.service_id.as_deref(), Some("4421"));
    assert_eq!(german_job.target_kind(), TargetKind::Username);
    assert_eq!(german_job.target_value, "alice_ig");

    let variation_job = jobs.find(variation_id).await?.expect("job exists");
    assert_eq!(variation_job.product_id, 12);
    assert_eq!(variation_job.service_id.as_deref(), Some("4430"));

    // Initial delay keeps fresh jobs out of the next sweep.
    assert!(jobs.select_eligible(10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn unlisted_variation_uses_parent_routing() -> Result<()> {
    let dir = TempDir::new()?;
    let table = RoutingTable::from_path(write_routing(&dir, ROUTING))?;

    let db = setup_test_db().await?;
    let jobs = job_repo(&db, &WorkerConfig::default());
    let ingestion = IngestionService::new(
        jobs.clone(),
        Arc::new(table),
        Arc::new(InMemoryOrderSource::new(IngestionConfig::default())),
        IngestionConfig::default(),
        Duration::seconds(120),
    );

    let mut identifier = identifier_order(100, "alice_ig", 50);
    identifier.region = Some("DE".to_string());
    identifier.line_items[0].variation_id = Some(15);

    let mut links = link_set_order(101, "https://www.instagram.com/p/A/", 10);
    links.line_items[0].variation_id = Some(25);

    let identifier_id = ingestion.ingest(&identifier).await.job_ids[0];
    let links_id = ingestion.ingest(&links).await.job_ids[0];

    let identifier_job = jobs.find(identifier_id).await?.expect("job exists");
    assert_eq!(identifier_job.product_id, 15);
    assert_eq!(identifier_job.service_id.as_deref(), Some("4421"));
    assert_eq!(identifier_job.target_kind(), TargetKind::Username);

    let links_job = jobs.find(links_id).await?.expect("job exists");
    assert_eq!(links_job.service_id.as_deref(), Some("5510"));
    assert_eq!(links_job.target_kind(), TargetKind::LinkSet);
    assert_eq!(links_job.target_value, "https://www.instagram.com/p/A/");
    Ok(())
}
