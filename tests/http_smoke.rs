//! Black-box smoke test for the HTTP surface, exercised over a real TCP
//! socket rather than through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use sidecar_observer::config::Config;
use sidecar_observer::event::{Event, EventKind, Stream};
use sidecar_observer::sidecar::Sidecar;
use sidecar_observer::sink::NullSink;

#[tokio::test]
async fn health_and_metrics_are_reachable_over_http() {
    let sidecar = Sidecar::new(Config::default(), Arc::new(NullSink));
    sidecar.start().await;
    sidecar.submit(Event::new(EventKind::TestStart, Stream::Events)).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = sidecar_observer::http::router(sidecar.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());
    let body: serde_json::Value = health.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let metrics = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap();
    assert!(metrics.status().is_success());
    let text = metrics.text().await.unwrap();
    assert!(text.contains("events_queued_total"));

    let adapters = client
        .get(format!("http://{addr}/adapters"))
        .send()
        .await
        .unwrap();
    assert!(adapters.status().is_success());
}
