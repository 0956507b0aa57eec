//! Request/response integration tests
//!
//! Calls submitted before the transport is even open, id round-trips,
//! deadline expiry and the semantic rejections.

mod common;

use common::{default_handler, server_info_reply, MockRippled};
use serde_json::{json, Value};
use xuplink_client::{ClientConfig, SendOptions, UplinkClient};

fn ledger_current_handler(request: &Value) -> Option<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    match request.get("command").and_then(Value::as_str) {
        Some("ledger_current") => Some(json!({
            "id": id,
            "status": "success",
            "type": "response",
            "result": { "ledger_current_index": 72 }
        })),
        _ => default_handler(request),
    }
}

#[tokio::test]
async fn send_before_connect_resolves_after_flush() {
    let server = MockRippled::with_handler(ledger_current_handler).await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    // submitted while the transport is still being dialed
    let result = client.send(json!({ "command": "ledger_current" })).await.unwrap();
    assert_eq!(result, json!({ "ledger_current_index": 72 }));

    assert!(client.state().await.online);

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn caller_id_round_trips_byte_for_byte() {
    let server = MockRippled::with_handler(|request| {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        match request.get("command").and_then(Value::as_str) {
            // mirror the envelope without a result body
            Some("echo_env") => Some(json!({ "id": id, "status": "success", "marker": "here" })),
            _ => default_handler(request),
        }
    })
    .await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    let original_id = json!({ "nested": ["ids", 42, { "survive": true }] });
    let reply = client
        .send(json!({ "id": original_id.clone(), "command": "echo_env" }))
        .await
        .unwrap();

    // no `result` field: the whole envelope comes back, id restored
    assert_eq!(reply["id"], original_id);
    assert_eq!(reply["marker"], "here");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn ledger_only_unsubscribe_is_rejected_verbatim() {
    let server = MockRippled::start().await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    let error = client
        .send(json!({ "command": "unsubscribe", "streams": ["ledger"] }))
        .await
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "Unsubscribing from (just) the ledger stream is not allowed"
    );

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_with_other_streams_goes_out_without_ledger() {
    let mut server = MockRippled::start().await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    client
        .send(json!({ "command": "unsubscribe", "streams": ["ledger", "transactions"] }))
        .await
        .unwrap();

    let mut seen = None;
    while let Some((_, request)) = server.next_request().await {
        if request["command"] == "unsubscribe" && request["id"].is_object() {
            seen = Some(request);
            break;
        }
    }
    let request = seen.expect("unsubscribe never reached the server");
    assert_eq!(request["streams"], json!(["transactions"]));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn deadline_expiry_rejects_with_seconds() {
    // answers probes, swallows everything else
    let server = MockRippled::start().await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    let error = client
        .send_with(
            json!({ "command": "ledger_entry" }),
            SendOptions {
                timeout_seconds: Some(0.3),
                ..SendOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "Call timeout after 0.3 seconds");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_calls_are_rejected_synchronously() {
    let server = MockRippled::start().await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    assert!(client.send(json!("just a string")).await.is_err());
    assert!(client.send(json!({ "streams": ["ledger"] })).await.is_err());

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn internal_ids_increase_monotonically_on_the_wire() {
    let mut server = MockRippled::with_handler(|request| {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        match request.get("command").and_then(Value::as_str) {
            Some("server_info") => Some(server_info_reply(id)),
            _ => Some(json!({ "id": id, "status": "success", "result": {} })),
        }
    })
    .await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    for _ in 0..3 {
        client.send(json!({ "command": "ping" })).await.unwrap();
    }

    let mut internals = Vec::new();
    while internals.len() < 3 {
        let (_, request) = server.next_request().await.expect("request missing");
        if let Some(internal) = request["id"]["internal"].as_u64() {
            internals.push(internal);
        }
    }
    assert!(internals.windows(2).all(|pair| pair[0] < pair[1]));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn flush_sends_queued_one_shots_before_subscriptions() {
    let mut server = MockRippled::with_handler(|request| {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        match request.get("command").and_then(Value::as_str) {
            Some("server_info") => Some(server_info_reply(id)),
            _ => Some(json!({ "id": id, "status": "success", "result": {} })),
        }
    })
    .await;
    let client = UplinkClient::open([server.url()], ClientConfig::default()).unwrap();

    // queued in this order while offline; the subscription is admitted
    // second but must still be flushed after every one-shot
    let subscription = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send(json!({ "command": "subscribe", "streams": ["transactions"] }))
                .await
        })
    };
    let one_shot = {
        let client = client.clone();
        tokio::spawn(async move { client.send(json!({ "command": "ping" })).await })
    };
    // replay opt-out: queued but never flushed
    let opted_out = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_with(
                    json!({ "command": "ping" }),
                    SendOptions {
                        no_replay_after_reconnect: true,
                        timeout_seconds: Some(0.5),
                        ..SendOptions::default()
                    },
                )
                .await
        })
    };

    subscription.await.unwrap().unwrap();
    one_shot.await.unwrap().unwrap();
    // never transmitted, so its deadline is the only way out
    assert!(opted_out.await.unwrap().is_err());

    let mut user_calls = Vec::new();
    while user_calls.len() < 2 {
        let (connection, request) = server.next_request().await.expect("request missing");
        assert_eq!(connection, 0);
        if request["id"].is_object() {
            user_calls.push((
                request["id"]["internal"].as_u64().unwrap(),
                request["command"].as_str().unwrap().to_string(),
            ));
        }
    }
    // one-shots first (ascending), then subscriptions
    assert_eq!(user_calls[0].1, "ping");
    assert_eq!(user_calls[1].1, "subscribe");

    client.close().await.unwrap();
    server.shutdown().await;
}
