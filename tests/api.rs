//! The JSON handlers a host web layer would mount.

mod common;

use common::http_server::{self, ServerOptions};
use common::{manager, sample_body};
use fetchd::api::{self, UrlRequest};
use serde_json::json;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn validate_reports_size_and_cap() {
    let base = http_server::start(sample_body(777));
    let dir = tempdir().unwrap();
    let m = manager(dir.path(), 2_147_483_648);

    let resp = api::validate(&m, "srv-1", &UrlRequest { url: format!("{base}/f.bin") }).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, json!({ "size": 777, "max_size": 2_147_483_648u64 }));

    let resp = api::validate(&m, "srv-1", &UrlRequest { url: "nope".into() }).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["error"], "invalid_url");
}

#[tokio::test]
async fn start_poll_conflict_cancel_roundtrip() {
    let base = http_server::start_with_options(
        sample_body(128 * 1024),
        ServerOptions::trickle(1024, Duration::from_millis(10)),
    );
    let dir = tempdir().unwrap();
    let m = manager(dir.path(), 2_147_483_648);
    let req = UrlRequest {
        url: format!("{base}/pack.zip"),
    };

    let started = api::start(&m, "srv-1", &req).await;
    assert_eq!(started.status, 200);
    assert_eq!(started.body["size"], 128 * 1024);
    let job_id = started.body["job_id"].as_str().unwrap().to_string();

    let conflict = api::start(&m, "srv-1", &req).await;
    assert_eq!(conflict.status, 409);
    assert_eq!(conflict.body["error"], "conflict");

    let polled = api::progress(&m, "srv-1", &job_id).await;
    assert_eq!(polled.status, 200);
    assert_eq!(polled.body["job_id"], job_id.as_str());
    assert_eq!(polled.body["status"], "downloading");
    assert_eq!(polled.body["total_size"], 128 * 1024);

    let cancelled = api::cancel(&m, "srv-1", &job_id).await;
    assert_eq!(cancelled.body, json!({ "success": true }));

    let polled = api::progress(&m, "srv-1", &job_id).await;
    assert_eq!(polled.body, json!({}));

    // Cancelling again, or something unknown, still reports success.
    assert_eq!(api::cancel(&m, "srv-1", &job_id).await.body, json!({ "success": true }));
    assert_eq!(api::cancel(&m, "srv-9", "bogus").await.body, json!({ "success": true }));
}

#[tokio::test]
async fn failed_job_shows_error_in_poll() {
    let base = http_server::start_with_options(
        sample_body(100),
        ServerOptions {
            get_status: 503,
            ..ServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let m = manager(dir.path(), 2_147_483_648);

    let started = api::start(&m, "srv-1", &UrlRequest { url: format!("{base}/x.bin") }).await;
    let job_id = started.body["job_id"].as_str().unwrap().to_string();
    m.join("srv-1").await;

    let polled = api::progress(&m, "srv-1", &job_id).await;
    assert_eq!(polled.body["status"], "error");
    assert!(polled.body["error"].as_str().unwrap().contains("503"));
}
