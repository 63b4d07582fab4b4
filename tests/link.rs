mod common;

use std::sync::Arc;
use std::time::Duration;

use chatlink::gateway::commands::{KICK_USER, SUB_GROUP, UNSUB_GROUP};
use chatlink::link::{Command, GatewayLinkHub, LinkState};
use common::{
    assert_silent, next_close_code, next_text, wait_until, GatewayNode, LogicNode, ALICE, BOB,
};
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

async fn wait_for_links(hub: &Arc<GatewayLinkHub>, n: usize) {
    let hub = Arc::clone(hub);
    wait_until("gateway links", move || hub.links().len() == n).await;
}

async fn linked_pair() -> (LogicNode, GatewayNode) {
    let logic = LogicNode::spawn().await;
    let gateway = GatewayNode::spawn(&[logic.url.clone()]).await;
    wait_for_links(&logic.state.hub, 1).await;
    (logic, gateway)
}

#[tokio::test]
async fn test_gateway_registers_with_its_name() {
    let (logic, gw) = linked_pair().await;

    let links = logic.state.hub.links();
    assert_eq!(links[0].name, gw.client.name());
    assert!(links[0].name.starts_with("test-gw-"));

    let mut state = gw.client.watch_state(&logic.url).unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == LinkState::Linked),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(gw.client.state("ws://elsewhere:1"), None);
}

#[tokio::test]
async fn test_user_push_reaches_only_that_user() {
    let (logic, gw) = linked_pair().await;
    let mut alice = gw.connect_registered(ALICE.1).await;
    let mut bob = gw.connect_registered(BOB.1).await;

    assert_eq!(logic.state.hub.send_to_user(vec![ALICE.0], "hello alice"), 1);

    assert_eq!(next_text(&mut alice).await, "hello alice");
    assert_silent(&mut bob, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_user_push_reaches_every_device() {
    let (logic, gw) = linked_pair().await;
    let mut phone = gw.connect_registered(ALICE.1).await;
    let mut laptop = gw.connect_registered(ALICE.1).await;

    logic.state.hub.send_to_user(vec![ALICE.0], "sync");

    assert_eq!(next_text(&mut phone).await, "sync");
    assert_eq!(next_text(&mut laptop).await, "sync");
}

#[tokio::test]
async fn test_group_push_reaches_members() {
    let (logic, gw) = linked_pair().await;
    gw.directory.join(ALICE.0, 10);
    let mut alice = gw.connect_registered(ALICE.1).await;
    let mut bob = gw.connect_registered(BOB.1).await;

    logic.state.hub.send_to_group(vec![10], "group news");

    assert_eq!(next_text(&mut alice).await, "group news");
    assert_silent(&mut bob, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_push_to_all_reaches_everyone() {
    let (logic, gw) = linked_pair().await;
    let mut alice = gw.connect_registered(ALICE.1).await;
    let mut bob = gw.connect_registered(BOB.1).await;

    logic.state.hub.send_to_all("maintenance at noon");

    assert_eq!(next_text(&mut alice).await, "maintenance at noon");
    assert_eq!(next_text(&mut bob).await, "maintenance at noon");
}

#[tokio::test]
async fn test_binary_payload_is_sent_as_binary_frame() {
    let (logic, gw) = linked_pair().await;
    let mut alice = gw.connect_registered(ALICE.1).await;

    logic.state.hub.send_to_user(vec![ALICE.0], vec![0xff, 0x00, 0xfe]);

    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), alice.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match msg {
            Message::Ping(_) => continue,
            Message::Binary(bytes) => {
                assert_eq!(&bytes[..], &[0xffu8, 0x00, 0xfe][..]);
                break;
            }
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_push_order_is_preserved() {
    let (logic, gw) = linked_pair().await;
    let mut alice = gw.connect_registered(ALICE.1).await;

    for i in 0..20 {
        logic.state.hub.send_to_user(vec![ALICE.0], format!("msg-{i}"));
    }
    for i in 0..20 {
        assert_eq!(next_text(&mut alice).await, format!("msg-{i}"));
    }
}

#[tokio::test]
async fn test_kick_user_command_closes_sessions() {
    let (logic, gw) = linked_pair().await;
    gw.directory.join(ALICE.0, 10);
    let mut alice = gw.connect_registered(ALICE.1).await;
    let _bob = gw.connect_registered(BOB.1).await;

    logic
        .state
        .hub
        .send_command(Command::new(KICK_USER).arg("uid", ALICE.0));

    assert_eq!(next_close_code(&mut alice).await, 4010);
    let sessions = Arc::clone(&gw.state.sessions);
    let groups = Arc::clone(&gw.state.groups);
    wait_until("kick cleanup", move || {
        sessions.find_by_uid(ALICE.0).is_empty() && groups.find_by_group_id(10).is_empty()
    })
    .await;
    assert_eq!(gw.state.sessions.find_by_uid(BOB.0).len(), 1);
}

#[tokio::test]
async fn test_sub_group_command_starts_group_traffic() {
    let (logic, gw) = linked_pair().await;
    let mut alice = gw.connect_registered(ALICE.1).await;
    let mut bob = gw.connect_registered(BOB.1).await;

    logic.state.hub.send_command(
        Command::new(SUB_GROUP)
            .arg("uid", ALICE.0)
            .arg("gids", "20"),
    );
    let groups = Arc::clone(&gw.state.groups);
    wait_until("subscribe", move || groups.find_by_group_id(20).len() == 1).await;

    logic.state.hub.send_to_group(vec![20], "welcome to 20");
    assert_eq!(next_text(&mut alice).await, "welcome to 20");
    assert_silent(&mut bob, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_unsub_group_command_stops_group_traffic() {
    let (logic, gw) = linked_pair().await;
    gw.directory.join(ALICE.0, 10);
    gw.directory.join(ALICE.0, 11);
    let mut alice = gw.connect_registered(ALICE.1).await;

    logic.state.hub.send_command(
        Command::new(UNSUB_GROUP)
            .arg("uid", ALICE.0)
            .arg("gids", "10"),
    );
    let groups = Arc::clone(&gw.state.groups);
    wait_until("unsubscribe", move || groups.find_by_group_id(10).is_empty()).await;

    logic.state.hub.send_to_group(vec![10], "not for alice");
    logic.state.hub.send_to_group(vec![11], "still subscribed");
    assert_eq!(next_text(&mut alice).await, "still subscribed");
}

#[tokio::test]
async fn test_gateway_relinks_after_hub_shutdown() {
    let (logic, gw) = linked_pair().await;
    let first = logic.state.hub.links()[0].id;

    logic.state.hub.shutdown();

    let hub = Arc::clone(&logic.state.hub);
    wait_until("relink", move || {
        hub.links().iter().any(|link| link.id != first)
    })
    .await;

    let mut alice = gw.connect_registered(ALICE.1).await;
    logic.state.hub.send_to_user(vec![ALICE.0], "after relink");
    assert_eq!(next_text(&mut alice).await, "after relink");
}

#[tokio::test]
async fn test_gateway_links_to_every_logic_node() {
    let a = LogicNode::spawn().await;
    let b = LogicNode::spawn().await;
    let gw = GatewayNode::spawn(&[a.url.clone(), b.url.clone(), a.url.clone()]).await;
    wait_for_links(&a.state.hub, 1).await;
    wait_for_links(&b.state.hub, 1).await;
    assert_eq!(gw.client.targets().len(), 2);

    let mut alice = gw.connect_registered(ALICE.1).await;
    a.state.hub.send_to_user(vec![ALICE.0], "from a");
    assert_eq!(next_text(&mut alice).await, "from a");
    b.state.hub.send_to_user(vec![ALICE.0], "from b");
    assert_eq!(next_text(&mut alice).await, "from b");
}

#[tokio::test]
async fn test_stopped_client_unlinks() {
    let (logic, gw) = linked_pair().await;
    let mut state = gw.client.watch_state(&logic.url).unwrap();

    gw.client.stop();

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == LinkState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    wait_for_links(&logic.state.hub, 0).await;
}
