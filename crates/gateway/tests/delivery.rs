#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end delivery scenarios across server instances.

mod common;

use common::*;

use meshdesk_gateway::directory::Role;

#[tokio::test]
async fn visitor_message_reaches_agent_on_another_server() {
    let cluster = spawn_cluster(2).await;
    let (server_a, server_b) = (&cluster.servers[0], &cluster.servers[1]);
    let client = reqwest::Client::new();

    let widget = seed_widget(&server_a.state, "t1", "p1", "example.com").await;
    let (_, agent_token) =
        seed_agent(&server_a.state, "t1", "p1", "grace@acme.test", Role::Agent).await;

    // Visitor connects to server A.
    let init = initiate_session(&client, server_a, &widget.id).await;
    let session_id = init["session_id"].as_str().unwrap().to_string();
    let ticket_id = init["ticket_id"].as_str().unwrap().to_string();
    let visitor_token = init["visitor_token"].as_str().unwrap().to_string();
    let mut visitor_ws = ws_connect(&server_a.ws_url(&format!(
        "/public/chat/ws/{session_id}?token={visitor_token}"
    )))
    .await;

    // Agent connects to server B and subscribes to the session.
    let mut agent_ws = ws_connect(&server_b.ws_url(&format!(
        "/tenants/t1/chat/agent/ws?token={agent_token}"
    )))
    .await;
    ws_send(&mut agent_ws, &serde_json::json!({
        "type": "session_subscribe",
        "session_id": session_id,
        "timestamp": 0,
    }))
    .await;
    // The subscribe is acknowledged by our own agent_joined echo.
    ws_expect(&mut agent_ws, |e| e.r#type == "agent_joined").await;

    // Visitor speaks on A; the agent on B receives the same message id.
    ws_send(&mut visitor_ws, &serde_json::json!({
        "type": "chat_message",
        "session_id": session_id,
        "data": {"content": "hello"},
        "timestamp": 0,
    }))
    .await;

    let received = ws_expect(&mut agent_ws, |e| e.r#type == "chat_message").await;
    let data = received.data.clone().unwrap();
    assert_eq!(data["content"], "hello");
    assert_eq!(data["author_type"], "visitor");
    let message_id = data["id"].as_str().unwrap().to_string();

    // The visitor's own echo carries the self tag.
    let echo = ws_expect(&mut visitor_ws, |e| e.r#type == "chat_message").await;
    assert_eq!(
        echo.delivery_type,
        Some(meshdesk_protocol::DeliveryType::SelfEcho)
    );

    // Durable history: the message is mirrored into the ticket, ordered last.
    let messages: Vec<serde_json::Value> = client
        .get(server_b.url(&format!("/tenants/t1/chat/sessions/{session_id}/messages")))
        .bearer_auth(&agent_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messages.last().unwrap()["id"].as_str().unwrap(), message_id);

    let mirror = cluster
        .servers[0]
        .state
        .engine
        .store()
        .list_ticket_messages("t1", &ticket_id, true)
        .await
        .unwrap();
    assert_eq!(mirror.last().unwrap().body, "hello");
}

#[tokio::test]
async fn agent_message_reaches_visitor_after_reconnect_to_other_server() {
    let cluster = spawn_cluster(2).await;
    let (server_a, server_b) = (&cluster.servers[0], &cluster.servers[1]);
    let client = reqwest::Client::new();

    let widget = seed_widget(&server_a.state, "t1", "p1", "example.com").await;
    let (_, agent_token) =
        seed_agent(&server_a.state, "t1", "p1", "grace@acme.test", Role::Agent).await;

    let init = initiate_session(&client, server_a, &widget.id).await;
    let session_id = init["session_id"].as_str().unwrap().to_string();
    let visitor_token = init["visitor_token"].as_str().unwrap().to_string();

    // Visitor starts on A, then A goes away.
    let visitor_ws = ws_connect(&server_a.ws_url(&format!(
        "/public/chat/ws/{session_id}?token={visitor_token}"
    )))
    .await;
    server_a.state.manager.shutdown().await;
    drop(visitor_ws);

    // The same token is accepted on B.
    let mut visitor_ws = ws_connect(&server_b.ws_url(&format!(
        "/public/chat/ws/{session_id}?token={visitor_token}"
    )))
    .await;

    // An agent posting over HTTP on B reaches the reconnected visitor.
    let response = client
        .post(server_b.url(&format!("/tenants/t1/chat/sessions/{session_id}/messages")))
        .bearer_auth(&agent_token)
        .json(&serde_json::json!({"content": "are you still there?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let received = ws_expect(&mut visitor_ws, |e| e.r#type == "chat_message").await;
    assert_eq!(received.data.unwrap()["content"], "are you still there?");
}

#[tokio::test]
async fn assignment_broadcast_reaches_subscribed_agents_cluster_wide() {
    let cluster = spawn_cluster(3).await;
    let (server_a, server_b, server_c) =
        (&cluster.servers[0], &cluster.servers[1], &cluster.servers[2]);
    let client = reqwest::Client::new();

    let widget = seed_widget(&server_a.state, "t1", "p1", "example.com").await;
    let (_, watcher_token) =
        seed_agent(&server_a.state, "t1", "p1", "watcher@acme.test", Role::Agent).await;
    let (assignee_id, _) =
        seed_agent(&server_a.state, "t1", "p1", "assignee@acme.test", Role::Agent).await;
    let (_, admin_token) =
        seed_agent(&server_a.state, "t1", "p1", "admin@acme.test", Role::ProjectAdmin).await;

    let init = initiate_session(&client, server_a, &widget.id).await;
    let session_id = init["session_id"].as_str().unwrap().to_string();

    // Watcher agent holds an agent-global socket on server B.
    let mut watcher_ws = ws_connect(&server_b.ws_url(&format!(
        "/tenants/t1/chat/agent/ws?token={watcher_token}"
    )))
    .await;

    // Admin assigns on server C.
    let response = client
        .post(server_c.url(&format!("/tenants/t1/chat/sessions/{session_id}/assign")))
        .bearer_auth(&admin_token)
        .json(&serde_json::json!({"agent_id": assignee_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let update = ws_expect(&mut watcher_ws, |e| {
        e.r#type == "session_update" && e.session_id == session_id
    })
    .await;
    assert_eq!(
        update.data.unwrap()["assigned_agent_id"].as_str().unwrap(),
        assignee_id
    );
}

#[tokio::test]
async fn private_agent_notes_never_reach_the_visitor_socket() {
    let cluster = spawn_cluster(1).await;
    let server = &cluster.servers[0];
    let client = reqwest::Client::new();

    let widget = seed_widget(&server.state, "t1", "p1", "example.com").await;
    let (_, agent_token) =
        seed_agent(&server.state, "t1", "p1", "grace@acme.test", Role::Agent).await;

    let init = initiate_session(&client, server, &widget.id).await;
    let session_id = init["session_id"].as_str().unwrap().to_string();
    let visitor_token = init["visitor_token"].as_str().unwrap().to_string();
    let mut visitor_ws = ws_connect(&server.ws_url(&format!(
        "/public/chat/ws/{session_id}?token={visitor_token}"
    )))
    .await;

    // Private note over HTTP, then a public reply.
    for (content, private) in [("internal note", true), ("hi there", false)] {
        let response = client
            .post(server.url(&format!("/tenants/t1/chat/sessions/{session_id}/messages")))
            .bearer_auth(&agent_token)
            .json(&serde_json::json!({"content": content, "is_private": private}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // The first chat_message the visitor sees is the public one.
    let first = ws_expect(&mut visitor_ws, |e| e.r#type == "chat_message").await;
    assert_eq!(first.data.unwrap()["content"], "hi there");
}

#[tokio::test]
async fn typing_indicators_fan_out_without_persisting() {
    let cluster = spawn_cluster(2).await;
    let (server_a, server_b) = (&cluster.servers[0], &cluster.servers[1]);
    let client = reqwest::Client::new();

    let widget = seed_widget(&server_a.state, "t1", "p1", "example.com").await;
    let (_, agent_token) =
        seed_agent(&server_a.state, "t1", "p1", "grace@acme.test", Role::Agent).await;

    let init = initiate_session(&client, server_a, &widget.id).await;
    let session_id = init["session_id"].as_str().unwrap().to_string();
    let visitor_token = init["visitor_token"].as_str().unwrap().to_string();

    let mut visitor_ws = ws_connect(&server_a.ws_url(&format!(
        "/public/chat/ws/{session_id}?token={visitor_token}"
    )))
    .await;
    let mut agent_ws = ws_connect(&server_b.ws_url(&format!(
        "/tenants/t1/chat/agent/ws?token={agent_token}"
    )))
    .await;
    ws_send(&mut agent_ws, &serde_json::json!({
        "type": "session_subscribe",
        "session_id": session_id,
        "timestamp": 0,
    }))
    .await;
    ws_expect(&mut agent_ws, |e| e.r#type == "agent_joined").await;

    ws_send(&mut visitor_ws, &serde_json::json!({
        "type": "typing_start",
        "session_id": session_id,
        "timestamp": 0,
    }))
    .await;

    let typing = ws_expect(&mut agent_ws, |e| e.r#type == "typing_start").await;
    assert_eq!(typing.session_id, session_id);

    // Nothing was persisted.
    let messages = server_a
        .state
        .engine
        .get_messages("t1", &session_id, None, 100, true)
        .await
        .unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn visitor_socket_rejects_bad_tokens() {
    let cluster = spawn_cluster(1).await;
    let server = &cluster.servers[0];
    let client = reqwest::Client::new();

    let widget = seed_widget(&server.state, "t1", "p1", "example.com").await;
    let init = initiate_session(&client, server, &widget.id).await;
    let session_id = init["session_id"].as_str().unwrap().to_string();

    // Missing and garbage tokens are refused before upgrade.
    for url in [
        server.ws_url(&format!("/public/chat/ws/{session_id}")),
        server.ws_url(&format!("/public/chat/ws/{session_id}?token=garbage")),
    ] {
        assert!(tokio_tungstenite::connect_async(url).await.is_err());
    }

    // A valid token for a different session is refused too.
    let other = initiate_session(&client, server, &widget.id).await;
    let other_token = other["visitor_token"].as_str().unwrap();
    assert!(
        tokio_tungstenite::connect_async(server.ws_url(&format!(
            "/public/chat/ws/{session_id}?token={other_token}"
        )))
        .await
        .is_err()
    );
}
