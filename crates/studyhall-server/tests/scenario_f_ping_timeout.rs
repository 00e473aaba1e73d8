//! Scenario F: a connection that never answers its health pings is timed
//! out, and the room's remaining subscriber sees the departure.

mod common;

use common::TestServerConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

async fn next_frame(
    socket: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Value {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn three_missed_pings_close_the_connection_and_notify_the_room() {
    let (addr, _pool) = common::spawn_test_server_with(TestServerConfig {
        ping_interval: Duration::from_millis(50),
        max_missed_pings: 3,
        ..TestServerConfig::default()
    })
    .await;
    let client = reqwest::Client::new();

    let alice = common::create_user(&client, addr, "Alice").await;
    let bob = common::create_user(&client, addr, "Bob").await;
    assert_eq!(common::join_room(&client, addr, 1, alice).await.status(), 200);
    assert_eq!(common::join_room(&client, addr, 1, bob).await.status(), 200);

    // Alice connects but never answers the "ping" application frames she
    // receives, simulating a dead peer.
    let (mut alice_ws, _) = connect_async(format!("ws://{addr}/room/1"))
        .await
        .expect("failed to connect");
    alice_ws
        .send(Message::Text(
            json!({ "type": "join", "user_id": alice, "display_name": "Alice" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let _history = next_frame(&mut alice_ws).await;
    let _replayed_bob = next_frame(&mut alice_ws).await;

    let (mut bob_ws, _) = connect_async(format!("ws://{addr}/room/1"))
        .await
        .expect("failed to connect");
    bob_ws
        .send(Message::Text(
            json!({ "type": "join", "user_id": bob, "display_name": "Bob" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let _bob_history = next_frame(&mut bob_ws).await;
    let replayed_alice = next_frame(&mut bob_ws).await;
    assert_eq!(replayed_alice["type"], "user-joined");
    assert_eq!(replayed_alice["principal_id"], alice);

    // Drain pings from Alice's socket without ever replying, until the
    // server closes her connection with CONNECTION_TIMEOUT.
    let timeout_frame = loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), next_frame(&mut alice_ws))
            .await
            .expect("server never timed out alice's connection");
        if frame["type"] == "ping" {
            continue;
        }
        break frame;
    };
    assert_eq!(timeout_frame["type"], "error");
    assert_eq!(timeout_frame["code"], "CONNECTION_TIMEOUT");

    // Bob observes Alice's forced departure.
    let left = loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), next_frame(&mut bob_ws))
            .await
            .expect("bob never saw alice's departure");
        if frame["type"] == "ping" {
            continue;
        }
        break frame;
    };
    assert_eq!(left["type"], "user-left");
    assert_eq!(left["principal_id"], alice);
    assert_eq!(left["occupancy"], 1);
}
