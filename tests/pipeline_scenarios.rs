//! End-to-end delivery scenarios: ingestion, sweep and a mock provider panel.

mod test_utils;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use smm_dispatch::client::transport::{ReqwestTransport, Transport, TransportError, TransportResponse};
use smm_dispatch::config::StaticConfigProvider;
use smm_dispatch::models::smm_job::JobStatus;
use smm_dispatch::orders::MetaEntry;
use smm_dispatch::worker::RetryWorker;
use test_utils::{
    Pipeline, fast_worker_config, identifier_order, link_set_order, setup_test_db,
};

const LINKS: &str = "https://www.instagram.com/p/A/,https://www.instagram.com/p/B/,https://www.instagram.com/reel/C/";

fn form(request: &Request) -> HashMap<String, String> {
    url::form_urlencoded::parse(&request.body)
        .into_owned()
        .collect()
}

/// Accepts every order with an increasing provider id, optionally failing
/// the first submission whose link contains `fail_link`.
struct Panel {
    next_id: AtomicUsize,
    fail_link: Option<&'static str>,
    failures_left: Mutex<usize>,
}

impl Panel {
    fn accepting() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            fail_link: None,
            failures_left: Mutex::new(0),
        }
    }

    fn failing_once(link: &'static str) -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            fail_link: Some(link),
            failures_left: Mutex::new(1),
        }
    }
}

impl Respond for Panel {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let fields = form(request);
        if let (Some(fail_link), Some(link)) = (self.fail_link, fields.get("link")) {
            let mut left = self.failures_left.lock().unwrap();
            if link.contains(fail_link) && *left > 0 {
                *left -= 1;
                return ResponseTemplate::new(500).set_body_string("upstream hiccup");
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(json!({ "order": id }))
    }
}

async fn submitted(server: &MockServer) -> Vec<HashMap<String, String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(form)
        .collect()
}

#[tokio::test]
async fn identifier_job_is_delivered() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("action=add"))
        .and(body_string_contains("service=4420"))
        .and(body_string_contains("link=alice_ig"))
        .and(body_string_contains("quantity=50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "order": 555 })))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, &server.uri(), fast_worker_config());
    let job_ids = pipeline.ingest(identifier_order(100, "alice_ig", 50)).await;
    assert_eq!(job_ids.len(), 1);

    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Success.as_str());
    assert_eq!(job.provider_job_id.as_deref(), Some("555"));

    // Delivered jobs are never picked up again.
    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.processed, 0);
    Ok(())
}

#[tokio::test]
async fn link_set_quantity_is_split_across_links() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Panel::accepting())
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, &server.uri(), fast_worker_config());
    let job_ids = pipeline.ingest(link_set_order(200, LINKS, 10)).await;

    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.succeeded, 1);

    let requests = submitted(&server).await;
    let quantities: Vec<_> = requests.iter().map(|r| r["quantity"].as_str()).collect();
    let links: Vec<_> = requests.iter().map(|r| r["link"].as_str()).collect();
    assert_eq!(quantities, vec!["4", "3", "3"]);
    assert_eq!(
        links,
        vec![
            "https://www.instagram.com/p/A/",
            "https://www.instagram.com/p/B/",
            "https://www.instagram.com/reel/C/",
        ]
    );
    assert!(requests.iter().all(|r| r["service"] == "5510"));

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.provider_job_id.as_deref(), Some("1,2,3"));
    Ok(())
}

#[tokio::test]
async fn duplicate_ingestion_creates_one_job() -> Result<()> {
    let server = MockServer::start().await;
    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, &server.uri(), fast_worker_config());

    let first = pipeline.ingest(identifier_order(100, "alice_ig", 50)).await;
    let second = pipeline.ingest(identifier_order(100, "alice_ig", 50)).await;

    assert_eq!(first, second);
    assert_eq!(pipeline.jobs.counts_by_status().await?.total, 1);
    Ok(())
}

#[tokio::test]
async fn rejected_job_stops_after_max_attempts() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "Not enough funds" })))
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let config = fast_worker_config();
    let max_attempts = config.max_attempts;
    let pipeline = Pipeline::new(&db, &server.uri(), config);
    let job_ids = pipeline.ingest(identifier_order(100, "alice_ig", 50)).await;

    for _ in 0..max_attempts {
        let report = pipeline.worker.sweep().await?;
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
    }

    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.processed, 0);

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Pending.as_str());
    assert_eq!(job.attempts, max_attempts);
    assert!(job.last_message.unwrap_or_default().contains("Not enough funds"));
    assert_eq!(pipeline.jobs.count_exhausted().await?, 1);
    assert_eq!(submitted(&server).await.len(), max_attempts as usize);
    Ok(())
}

struct Unreachable {
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for Unreachable {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn post_form(
        &self,
        _url: &str,
        _form: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError {
            transport: self.name().to_string(),
            message: "connection reset".to_string(),
        })
    }
}

#[tokio::test]
async fn failing_transport_falls_back_to_next() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "order": 777 })))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, &server.uri(), fast_worker_config());
    let job_ids = pipeline.ingest(identifier_order(100, "alice_ig", 50)).await;

    let unreachable = Arc::new(Unreachable {
        calls: AtomicUsize::new(0),
    });
    let first: Arc<dyn Transport> = unreachable.clone();
    let fallback: Arc<dyn Transport> = Arc::new(ReqwestTransport::url_fetch(
        std::time::Duration::from_secs(5),
        std::time::Duration::from_secs(5),
    )?);
    let worker = pipeline.worker.with_transport_chain(vec![first, fallback]);

    let report = worker.sweep().await?;
    assert_eq!(report.succeeded, 1);
    assert_eq!(unreachable.calls.load(Ordering::SeqCst), 1);

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.provider_job_id.as_deref(), Some("777"));
    assert_eq!(job.attempts, 0);
    Ok(())
}

#[tokio::test]
async fn retry_does_not_resubmit_delivered_links() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(Panel::failing_once("/reel/C/"))
        .mount(&server)
        .await;

    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, &server.uri(), fast_worker_config());
    let job_ids = pipeline.ingest(link_set_order(200, LINKS, 10)).await;

    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.failed, 1);
    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.attempts, 1);
    assert!(job.last_message.unwrap_or_default().contains("HTTP 500"));
    assert_eq!(pipeline.jobs.delivered_targets(job.id).await?.len(), 2);

    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.succeeded, 1);

    let links: Vec<_> = submitted(&server)
        .await
        .into_iter()
        .map(|r| r["link"].clone())
        .collect();
    assert_eq!(links.len(), 4);
    assert_eq!(
        links.iter().filter(|l| l.ends_with("/p/A/")).count(),
        1,
        "first link billed once"
    );
    assert_eq!(links.iter().filter(|l| l.ends_with("/reel/C/")).count(), 2);

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Success.as_str());
    assert_eq!(job.provider_job_id.as_deref(), Some("1,2,3"));
    Ok(())
}

#[tokio::test]
async fn sweep_without_provider_settings_consumes_no_attempts() -> Result<()> {
    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, "http://127.0.0.1:9", fast_worker_config());
    let job_ids = pipeline.ingest(identifier_order(100, "alice_ig", 50)).await;

    let worker = RetryWorker::new(
        pipeline.jobs.clone(),
        pipeline.orders.clone(),
        Arc::new(StaticConfigProvider::new()),
        fast_worker_config(),
    );
    let report = worker.sweep().await?;
    assert_eq!(report.processed, 0);

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.attempts, 0);
    Ok(())
}

#[tokio::test]
async fn unrouted_product_records_validation_failure() -> Result<()> {
    let server = MockServer::start().await;
    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, &server.uri(), fast_worker_config());

    let mut order = identifier_order(300, "bob_ig", 25);
    order.line_items[0].product_id = 999;
    let job_ids = pipeline.ingest(order).await;

    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.failed, 1);

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.attempts, 1);
    assert!(job.service_id.is_none());
    assert!(job.last_message.unwrap_or_default().contains("no service id"));
    assert!(submitted(&server).await.is_empty());

    Ok(())
}

#[tokio::test]
async fn overflowing_quantity_is_a_validation_failure() -> Result<()> {
    let server = MockServer::start().await;
    let db = setup_test_db().await?;
    let pipeline = Pipeline::new(&db, &server.uri(), fast_worker_config());

    let mut order = link_set_order(400, LINKS, 9_000_000_000_000_000_000);
    order.meta.push(MetaEntry::new("multiplier", "3"));
    let job_ids = pipeline.ingest(order).await;

    let report = pipeline.worker.sweep().await?;
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);

    let job = pipeline.jobs.find(job_ids[0]).await?.expect("job exists");
    assert_eq!(job.attempts, 1);
    assert!(job.last_message.unwrap_or_default().contains("overflows"));
    assert!(submitted(&server).await.is_empty());
    Ok(())
}
