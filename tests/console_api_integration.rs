//! Integration tests for the console REST + WebSocket surface.
//!
//! Each test spins up an Axum server on a random port backed by a console
//! with the simulated backend, then drives it over HTTP and WebSocket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use ops_console::api::routes;
use ops_console::config::{ConsoleConfig, SimulationConfig};
use ops_console::console::Console;
use ops_console::error::MailboxError;
use ops_console::ingest::{MailItem, MailboxClient};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Mailbox that never has anything new.
struct EmptyMailbox;

#[async_trait]
impl MailboxClient for EmptyMailbox {
    async fn fetch_recent(
        &self,
        _credential: &SecretString,
        _max_results: u32,
    ) -> Result<Vec<MailItem>, MailboxError> {
        Ok(Vec::new())
    }
}

fn test_config() -> ConsoleConfig {
    ConsoleConfig {
        api_key: None,
        simulation: SimulationConfig {
            enabled: false,
            interval: Duration::from_secs(3600),
            probability: 0.0,
            backend_delay: Duration::from_millis(1),
        },
        recall_delay: Duration::from_millis(1),
        auto_connect: Vec::new(),
        ..ConsoleConfig::default()
    }
}

/// Start an Axum server on a random port, return (base url, console).
async fn start_server() -> (String, Arc<Console>) {
    let console = Console::with_mailbox(test_config(), Arc::new(EmptyMailbox));
    console.start().await;
    let app = routes(console.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("127.0.0.1:{port}"), console)
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

async fn dispatch(client: &reqwest::Client, addr: &str, content: &str) -> Value {
    let resp = client
        .post(format!("http://{addr}/api/dispatch"))
        .json(&json!({ "source": "slack", "content": content, "sender": "maya" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

async fn wait_for_status(client: &reqwest::Client, addr: &str, id: &str, status: &str) -> Value {
    loop {
        let task: Value = client
            .get(format!("http://{addr}/api/tasks/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if task["status"] == status {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── REST Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn dispatch_and_process_to_completion() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _console) = start_server().await;
        let client = reqwest::Client::new();

        let task = dispatch(&client, &addr, "We need a PRD for feature X, priority high").await;
        assert_eq!(task["status"], "PENDING");
        assert_eq!(task["sender"], "maya");
        let id = task["id"].as_str().unwrap().to_string();

        let resp = client
            .post(format!("http://{addr}/api/tasks/{id}/process"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);

        let done = wait_for_status(&client, &addr, &id, "COMPLETED").await;
        assert_eq!(done["classification"]["priority"], "HIGH");
        assert_eq!(done["decision"]["output_type"], "PRD");
        assert!(
            done["output"]["content"]
                .as_str()
                .unwrap()
                .contains("Simulated PRD")
        );

        let trace: Value = client
            .get(format!("http://{addr}/api/trace"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let roles: Vec<&str> = trace
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["role"].as_str())
            .collect();
        for role in ["Ingestion", "Classifier", "Recall", "Decision", "Execution"] {
            assert!(roles.contains(&role), "missing {role} in {roles:?}");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn blank_dispatch_creates_nothing() {
    timeout(TEST_TIMEOUT, async {
        let (addr, console) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{addr}/api/dispatch"))
            .json(&json!({ "source": "jira", "content": "  \n " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
        assert!(console.store().is_empty().await);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn resubmitting_a_completed_task_conflicts() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _console) = start_server().await;
        let client = reqwest::Client::new();

        let task = dispatch(&client, &addr, "Is the launch still on for Friday?").await;
        let id = task["id"].as_str().unwrap().to_string();
        client
            .post(format!("http://{addr}/api/tasks/{id}/process"))
            .send()
            .await
            .unwrap();
        wait_for_status(&client, &addr, &id, "COMPLETED").await;

        let resp = client
            .post(format!("http://{addr}/api/tasks/{id}/process"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);

        let resp = client
            .post(format!("http://{addr}/api/tasks/{id}/retry"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _console) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("http://{addr}/api/tasks/missing"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client
            .post(format!("http://{addr}/api/tasks/missing/process"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn auto_trigger_processes_new_signals() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _console) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{addr}/api/connectors/slack/connect"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let resp = client
            .post(format!("http://{addr}/api/connectors/slack/auto"))
            .json(&json!({ "enabled": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let task = dispatch(&client, &addr, "Can someone summarize the incident channel?").await;
        let id = task["id"].as_str().unwrap().to_string();
        let done = wait_for_status(&client, &addr, &id, "COMPLETED").await;
        assert_eq!(done["decision"]["output_type"], "SUMMARY");
    })
    .await
    .expect("test timed out");
}

// ── WebSocket Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn ws_receives_sync_then_task_events() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _console) = start_server().await;
        let client = reqwest::Client::new();

        let (mut ws, _resp) = connect_async(format!("ws://{addr}/ws/events"))
            .await
            .expect("WS connect failed");

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "sync");
        assert!(json["tasks"].as_array().unwrap().is_empty());
        assert!(json["trace"].as_array().unwrap().is_empty());
        assert_eq!(json["busy"], false);

        let task = dispatch(&client, &addr, "FYI staging is down tonight").await;

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "task_created");
        assert_eq!(json["task"]["id"], task["id"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_process_action_streams_completion() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _console) = start_server().await;
        let client = reqwest::Client::new();
        let task = dispatch(&client, &addr, "Please draft a reply to Acme").await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events"))
            .await
            .unwrap();
        let sync = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(sync["tasks"].as_array().unwrap().len(), 1);

        let action = json!({ "action": "process", "task_id": task["id"] });
        ws.send(Message::Text(action.to_string().into())).await.unwrap();

        let mut saw_trace = false;
        loop {
            let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
            if json["type"] == "trace_entry" {
                saw_trace = true;
            }
            if json["type"] == "task_updated" && json["task"]["status"] == "COMPLETED" {
                assert_eq!(json["task"]["decision"]["output_type"], "EMAIL");
                break;
            }
        }
        assert!(saw_trace);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_rejected_action_returns_error() {
    timeout(TEST_TIMEOUT, async {
        let (addr, _console) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events"))
            .await
            .unwrap();
        let _sync = ws.next().await.unwrap().unwrap();

        let action = json!({ "action": "retry", "task_id": "nope" });
        ws.send(Message::Text(action.to_string().into())).await.unwrap();

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "error");
        assert!(json["message"].as_str().unwrap().contains("nope"));
    })
    .await
    .expect("test timed out");
}
