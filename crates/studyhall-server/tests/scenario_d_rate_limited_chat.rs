//! Scenario D: an 11th `send-message` within the chat-send window is
//! rejected with `rate-limit-exceeded` and never reaches another subscriber.

mod common;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
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
async fn eleventh_chat_send_within_the_window_is_rate_limited() {
    let (addr, _pool) = common::spawn_test_server().await;
    let client = reqwest::Client::new();

    let alice = common::create_user(&client, addr, "Alice").await;
    let bob = common::create_user(&client, addr, "Bob").await;
    assert_eq!(common::join_room(&client, addr, 1, alice).await.status(), 200);
    assert_eq!(common::join_room(&client, addr, 1, bob).await.status(), 200);

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
    let history = next_frame(&mut alice_ws).await;
    assert_eq!(history["type"], "chat-history");
    let replayed_bob = next_frame(&mut alice_ws).await;
    assert_eq!(replayed_bob["type"], "user-joined");

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

    for i in 0..10 {
        alice_ws
            .send(Message::Text(
                json!({ "type": "send-message", "user_id": alice, "content": format!("msg {i}") })
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
        let echoed = next_frame(&mut alice_ws).await;
        assert_eq!(echoed["type"], "new-message");
        assert_eq!(echoed["content"], format!("msg {i}"));
    }

    alice_ws
        .send(Message::Text(
            json!({ "type": "send-message", "user_id": alice, "content": "one too many" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let limited = next_frame(&mut alice_ws).await;
    assert_eq!(limited["type"], "rate-limit-exceeded");
    assert_eq!(limited["action"], "chat_send");

    // Bob, the other room subscriber, saw exactly the 10 accepted messages —
    // the 11th never fanned out to him.
    for i in 0..10 {
        let forwarded = next_frame(&mut bob_ws).await;
        assert_eq!(forwarded["type"], "new-message");
        assert_eq!(forwarded["content"], format!("msg {i}"));
    }
    let nothing_more = tokio::time::timeout(std::time::Duration::from_millis(200), bob_ws.next()).await;
    assert!(nothing_more.is_err(), "bob should not receive an 11th new-message");
}
