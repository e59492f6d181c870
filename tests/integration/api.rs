use std::time::Duration;

use serde_json::Value;

use crate::*;

#[tokio::test]
async fn test_api_serves_recorded_rtt() {
    let stack = Stack::start().await.unwrap();
    probe_handshake(stack.probe_addr).await.unwrap();
    stack
        .wait_for_record("127.0.0.1", Duration::from_secs(10))
        .await
        .unwrap();

    let (status, body) = stack.api_get("/rtt?ip=127.0.0.1").await.unwrap();
    assert_eq!(status, 200);
    let rec: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(rec["address"], "127.0.0.1");
    assert_eq!(rec["measurement_id"], "it-1");
    assert_eq!(rec["path_rtt_ms"], 40.0);
    assert!(rec["kernel_rtt_ms"].is_number());
    assert!(rec["updated_at"].is_string());
    assert_eq!(rec["probes"].as_array().map(Vec::len), Some(2));

    let (status, body) = stack.api_get("/rtt/all").await.unwrap();
    assert_eq!(status, 200);
    let all: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(all.as_array().map(Vec::len), Some(1));

    let (status, body) = stack.api_get("/status").await.unwrap();
    assert_eq!(status, 200);
    let st: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(st["fresh_records"], 1);
    assert_eq!(st["stored_records"], 1);
    assert_eq!(st["gated_addresses"], 1);
    assert!(st["uptime_secs"].is_number());
}

#[tokio::test]
async fn test_api_unknown_and_missing_ip() {
    let stack = Stack::start().await.unwrap();

    let (status, body) = stack.api_get("/rtt?ip=192.0.2.55").await.unwrap();
    assert_eq!(status, 404);
    assert_eq!(body, "not found or expired");

    let (status, _) = stack.api_get("/rtt").await.unwrap();
    assert_eq!(status, 400);

    let (status, body) = stack.api_get("/rtt/all").await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, "[]");
}
