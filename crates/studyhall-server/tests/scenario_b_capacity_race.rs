//! Scenario B: a room with one open seat left admits exactly one of several
//! concurrent join attempts; everyone else is rejected with `ROOM_FULL` and
//! the room's final occupancy reflects exactly the one admission.

mod common;

use futures_util::future::join_all;
use serde_json::Value;

#[tokio::test]
async fn only_one_of_several_concurrent_joiners_fills_the_last_seat() {
    let (addr, _pool) = common::spawn_test_server().await;
    let client = reqwest::Client::new();

    // common::ROOM_CAPACITY is 2; fill one seat first so exactly one spot
    // remains for the race. Identity creation is rate-limited at 5/min per
    // address, so the whole test budgets exactly 5 POST /users calls.
    let first = common::create_user(&client, addr, "First").await;
    let first_join = common::join_room(&client, addr, 1, first).await;
    assert_eq!(first_join.status(), 200);

    let contenders = join_all(
        (0..4).map(|i| {
            let client = client.clone();
            async move { common::create_user(&client, addr, &format!("Contender{i}")).await }
        }),
    )
    .await;

    let results = join_all(contenders.into_iter().map(|user_id| {
        let client = client.clone();
        async move { common::join_room(&client, addr, 1, user_id).await.status() }
    }))
    .await;

    let admitted = results.iter().filter(|s| s.as_u16() == 200).count();
    let rejected = results.iter().filter(|s| s.as_u16() == 409).count();
    assert_eq!(admitted, 1, "exactly the one remaining seat should be filled");
    assert_eq!(rejected, 3);

    let rooms_resp = client
        .get(format!("http://{addr}/rooms"))
        .send()
        .await
        .unwrap();
    let rooms: Value = rooms_resp.json().await.unwrap();
    let room1 = rooms["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == 1)
        .unwrap();
    assert_eq!(room1["occupancy"], common::ROOM_CAPACITY);
    assert_eq!(room1["is_full"], true);
}
