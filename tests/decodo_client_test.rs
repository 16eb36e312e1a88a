/// Provider polling client tests against a mocked scraping API.
use pagecascade::{BatchConfig, DecodoClient, FetchStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn provider_config(server: &mockito::Server) -> BatchConfig {
    BatchConfig {
        decodo_enabled: true,
        decodo_auth_token: Some("dGVzdDp0ZXN0".to_string()),
        decodo_api_endpoint: format!("{}/v2/task/batch", server.url()),
        decodo_results_endpoint: format!("{}/v2/task", server.url()),
        decodo_poll_interval_secs: 1,
        decodo_max_poll_attempts: 10,
        decodo_timeout_secs: 20,
        ..BatchConfig::default()
    }
}

#[test]
fn construction_fails_without_credentials() {
    let config = BatchConfig {
        decodo_auth_token: None,
        ..BatchConfig::default()
    };
    let err = DecodoClient::from_config(&config).err().expect("must fail");
    assert!(err.to_string().contains("credentials"));
}

#[tokio::test]
async fn submit_then_first_poll_done_succeeds() {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let url = "https://shop.example/p/1".to_string();

    let submit = server
        .mock("POST", "/v2/task/batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"queries": [{"id": "T1", "url": url}]}).to_string())
        .expect(1)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/v2/task/T1/results")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "status": "done",
                "results": [{"content": "<html>provider</html>", "status": "done"}]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = DecodoClient::from_config(&provider_config(&server)).expect("client");
    let outcomes = client.process_urls(&[url]).await;

    submit.assert_async().await;
    poll.assert_async().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, FetchStatus::Success);
    assert_eq!(outcomes[0].html.as_deref(), Some("<html>provider</html>"));
}

#[tokio::test]
async fn pending_then_done_requires_at_least_two_polls() {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let url = "https://shop.example/search?q=xyz".to_string();

    server
        .mock("POST", "/v2/task/batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"tasks": [{"id": "T7", "url": url}]}).to_string())
        .create_async()
        .await;

    let polls = Arc::new(AtomicUsize::new(0));
    let poll_body = {
        let polls = Arc::clone(&polls);
        move |_req: &mockito::Request| {
            let call = polls.fetch_add(1, Ordering::SeqCst);
            let body = if call == 0 {
                serde_json::json!({"status": "pending"})
            } else {
                serde_json::json!({
                    "status": "done",
                    "results": [{"content": "<html>finally</html>"}]
                })
            };
            body.to_string().into_bytes()
        }
    };
    let poll = server
        .mock("GET", "/v2/task/T7/results")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(poll_body)
        .expect(2)
        .create_async()
        .await;

    let client = DecodoClient::from_config(&provider_config(&server)).expect("client");
    let outcomes = client.process_urls(&[url]).await;

    poll.assert_async().await;
    assert_eq!(outcomes[0].status, FetchStatus::Success);
    assert!(polls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn not_found_means_not_ready_and_keeps_polling() {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let url = "https://shop.example/p/2".to_string();

    server
        .mock("POST", "/v2/task/batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"queries": [{"id": "T2", "url": url}]}).to_string())
        .create_async()
        .await;
    // Results never materialize; the task must keep polling until the
    // deadline rather than fail on the 404s.
    let poll = server
        .mock("GET", "/v2/task/T2/results")
        .with_status(404)
        .expect_at_least(2)
        .create_async()
        .await;

    let mut config = provider_config(&server);
    config.decodo_timeout_secs = 3;
    let client = DecodoClient::from_config(&config).expect("client");
    let outcomes = client.process_urls(&[url]).await;

    poll.assert_async().await;
    assert_eq!(outcomes[0].status, FetchStatus::Failed);
    let error = outcomes[0].error.clone().unwrap_or_default();
    assert!(
        error.contains("timed out") || error.contains("pending"),
        "error was: {}",
        error
    );
}

#[tokio::test]
async fn client_error_status_is_terminal() {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let url = "https://shop.example/p/3".to_string();

    server
        .mock("POST", "/v2/task/batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"queries": [{"id": "T3", "url": url}]}).to_string())
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/v2/task/T3/results")
        .with_status(410)
        .expect(1)
        .create_async()
        .await;

    let client = DecodoClient::from_config(&provider_config(&server)).expect("client");
    let outcomes = client.process_urls(&[url]).await;

    poll.assert_async().await;
    assert_eq!(outcomes[0].status, FetchStatus::Failed);
    assert!(
        outcomes[0].error.as_deref().unwrap_or_default().contains("410"),
        "error was: {:?}",
        outcomes[0].error
    );
}

#[tokio::test]
async fn failed_task_status_fails_the_url() {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let url = "https://shop.example/p/4".to_string();

    server
        .mock("POST", "/v2/task/batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"queries": [{"id": "T4", "url": url}]}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/v2/task/T4/results")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"status": "failed"}).to_string())
        .create_async()
        .await;

    let client = DecodoClient::from_config(&provider_config(&server)).expect("client");
    let outcomes = client.process_urls(&[url]).await;

    assert_eq!(outcomes[0].status, FetchStatus::Failed);
    assert!(outcomes[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("failed"));
}

#[tokio::test]
async fn missing_task_ids_fail_every_url() {
    init_logger();
    let mut server = mockito::Server::new_async().await;

    server
        .mock("POST", "/v2/task/batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"message": "accepted"}).to_string())
        .create_async()
        .await;

    let client = DecodoClient::from_config(&provider_config(&server)).expect("client");
    let urls = vec![
        "https://a.example/".to_string(),
        "https://b.example/".to_string(),
    ];
    let outcomes = client.process_urls(&urls).await;

    assert_eq!(outcomes.len(), 2);
    for (outcome, url) in outcomes.iter().zip(&urls) {
        assert_eq!(&outcome.url, url);
        assert_eq!(outcome.status, FetchStatus::Failed);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("no task IDs"));
    }
}

#[tokio::test]
async fn done_without_html_fails_with_clear_error() {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let url = "https://shop.example/p/5".to_string();

    server
        .mock("POST", "/v2/task/batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"queries": [{"id": "T5", "url": url}]}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/v2/task/T5/results")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"status": "done", "results": []}).to_string())
        .create_async()
        .await;

    let client = DecodoClient::from_config(&provider_config(&server)).expect("client");
    let outcomes = client.process_urls(&[url]).await;

    assert_eq!(outcomes[0].status, FetchStatus::Failed);
    assert!(outcomes[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no HTML content"));
}
