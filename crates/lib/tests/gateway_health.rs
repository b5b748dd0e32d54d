//! Integration test: start the gateway on a free port, GET /api/health, assert health JSON.
//! Does not contact the upstream API. The server task is left running when the test ends.

use lib::config::Config;
use lib::gateway;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

#[tokio::test]
async fn gateway_health_http_responds_with_ok() {
    let port = free_port();

    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.upstream.api_key = Some("sk-test".to_string());

    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let url = format!("http://127.0.0.1:{}/api/health", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client
            .get(&url)
            .header("Origin", "http://localhost:5173")
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                let allow_origin = resp
                    .headers()
                    .get("access-control-allow-origin")
                    .map(|v| v.to_str().unwrap_or("").to_string());
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
                let ts = json
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .expect("timestamp");
                assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
                assert_eq!(allow_origin.as_deref(), Some("*"));
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    gateway_handle.abort();
    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn gateway_refuses_to_start_without_api_key() {
    if std::env::var("DASHSCOPE_API_KEY").is_ok() {
        return;
    }
    let mut config = Config::default();
    config.gateway.port = free_port();
    let err = gateway::run_gateway(config).await.unwrap_err();
    assert!(err.to_string().contains("API key"));
}
