//! End-to-end tests for `SyncLinkClient` against an in-process WebSocket
//! server. The server side speaks the wire protocol directly through
//! `synclink::{encode_message, decode_message}`.
//!
//! # Running
//!
//! ```bash
//! cargo test --test test_sync_client -- --nocapture
//! ```

use std::sync::Arc;
use std::time::Duration;

use synclink::{
    ConnectionOptions, ConnectionState, EventHandlers, RequestKind, SubscriptionEvent,
    SubscriptionStatus, SyncLinkClient, SyncLinkError, SyncLinkTimeouts, Value, WireMessage,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

mod common;

use common::{
    client_for, client_with_options, unreachable_base_url, wait_for_state, ServerConn, TestServer,
    STEP,
};

// ── shared helpers ────────────────────────────────────────────────────────────

/// Read the next `subscribe` and return `(subscription_id, query_path, args)`.
async fn expect_subscribe(conn: &mut ServerConn) -> (String, String, Value) {
    match conn.recv().await {
        WireMessage::Subscribe {
            subscription_id,
            query_path,
            args,
        } => (subscription_id, query_path, args),
        other => panic!("expected subscribe, got {:?}", other),
    }
}

async fn push_update(conn: &mut ServerConn, subscription_id: &str, value: Value) {
    conn.send(&WireMessage::QueryResult {
        subscription_id: subscription_id.to_string(),
        value,
        log_lines: Vec::new(),
    })
    .await;
}

async fn next_event(live: &mut synclink::LiveQuery) -> SubscriptionEvent {
    timeout(STEP, live.next())
        .await
        .expect("no subscription event in time")
        .expect("event stream ended")
}

/// Client aimed at a dead port with a three-attempt reconnect budget.
/// The receiver yields the attempt count passed to `on_reconnect_exhausted`.
async fn give_up_client(fail_subscriptions: bool) -> (SyncLinkClient, mpsc::UnboundedReceiver<u32>) {
    let (exhausted_tx, exhausted_rx) = mpsc::unbounded_channel();
    let handlers = EventHandlers::new().on_reconnect_exhausted(move |attempts| {
        let _ = exhausted_tx.send(attempts);
    });
    let options = ConnectionOptions::default()
        .with_reconnect_delay_ms(50)
        .with_max_reconnect_attempts(3)
        .with_fail_subscriptions_on_give_up(fail_subscriptions);
    let client = SyncLinkClient::builder()
        .base_url(unreachable_base_url().await)
        .timeouts(SyncLinkTimeouts::fast())
        .connection_options(options)
        .event_handlers(handlers)
        .build()
        .expect("build client");
    (client, exhausted_rx)
}

fn rows(n: i64) -> Value {
    Value::Array((0..n).map(|i| Value::object([("id", Value::Int64(i))])).collect())
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_authenticate_is_first_message_on_open() {
    let server = TestServer::bind().await;
    let client = SyncLinkClient::builder()
        .base_url(server.base_url())
        .jwt_token("token-abc")
        .timeouts(SyncLinkTimeouts::fast())
        .build()
        .expect("build client");

    let mut conn = server.accept().await;
    assert_eq!(
        conn.recv().await,
        WireMessage::Authenticate {
            token: "token-abc".to_string()
        }
    );
    client.wait_for_connection(STEP).await.expect("connected");
    assert_eq!(client.connection_state(), ConnectionState::Open);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_subscribe_receives_update() {
    let server = TestServer::bind().await;
    let client = client_for(&server);
    let mut conn = server.accept().await;

    let args = Value::object([("channel", Value::from("general"))]);
    let mut live = client.subscribe("messages:list", Some(args.clone())).await.expect("subscribe");

    let (sub_id, query_path, sent_args) = expect_subscribe(&mut conn).await;
    assert_eq!(query_path, "messages:list");
    assert_eq!(sent_args, args);

    push_update(&mut conn, &sub_id, rows(2)).await;
    match next_event(&mut live).await {
        SubscriptionEvent::Update(value) => assert_eq!(*value, rows(2)),
        other => panic!("expected update, got {:?}", other),
    }

    let info = client
        .subscription(live.id())
        .await
        .expect("query registry")
        .expect("subscription exists");
    assert_eq!(info.status, SubscriptionStatus::Active);
    assert_eq!(info.update_count, 1);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_identical_subscriptions_share_one_server_query() {
    let server = TestServer::bind().await;
    let client = client_for(&server);
    let mut conn = server.accept().await;
    client.wait_for_connection(STEP).await.expect("connected");

    let mut first = client.subscribe("tasks:open", None).await.expect("subscribe 1");
    let mut second = client.subscribe("tasks:open", None).await.expect("subscribe 2");
    assert_ne!(first.id(), second.id());

    let (sub_id, _, _) = expect_subscribe(&mut conn).await;
    push_update(&mut conn, &sub_id, rows(3)).await;

    let a = match next_event(&mut first).await {
        SubscriptionEvent::Update(value) => value,
        other => panic!("expected update, got {:?}", other),
    };
    let b = match next_event(&mut second).await {
        SubscriptionEvent::Update(value) => value,
        other => panic!("expected update, got {:?}", other),
    };
    assert!(Arc::ptr_eq(&a, &b));

    // The next client message is the mutation, so no second subscribe was sent.
    let mutation = tokio::spawn({
        let client = client.clone();
        async move { client.mutation("tasks:add", Value::object([("title", Value::from("x"))])).await }
    });
    match conn.recv().await {
        WireMessage::Request {
            kind: RequestKind::Mutation,
            request_id,
            ..
        } => {
            conn.send(&WireMessage::RequestResult {
                kind: RequestKind::Mutation,
                request_id,
                success: true,
                value: Value::Null,
                log_lines: Vec::new(),
                error_code: None,
            })
            .await;
        },
        other => panic!("expected mutation, got {:?}", other),
    }
    mutation.await.expect("join").expect("mutation ok");

    // Closing one handle keeps the server query alive; closing both ends it.
    first.close().await.expect("close first");
    second.close().await.expect("close second");
    assert_eq!(
        conn.recv().await,
        WireMessage::Unsubscribe {
            subscription_id: sub_id
        }
    );

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_resubscribes_after_server_drop() {
    let server = TestServer::bind().await;
    let client = client_for(&server);
    let mut conn = server.accept().await;

    let mut live = client.subscribe("feed:latest", None).await.expect("subscribe");
    let (sub_id, _, _) = expect_subscribe(&mut conn).await;
    push_update(&mut conn, &sub_id, rows(1)).await;
    assert!(matches!(next_event(&mut live).await, SubscriptionEvent::Update(_)));

    conn.kill();
    assert_eq!(next_event(&mut live).await, SubscriptionEvent::Disconnected);

    let mut conn = server.accept().await;
    let (resub_id, query_path, _) = expect_subscribe(&mut conn).await;
    assert_eq!(query_path, "feed:latest");

    push_update(&mut conn, &resub_id, rows(4)).await;
    match next_event(&mut live).await {
        SubscriptionEvent::Update(value) => assert_eq!(*value, rows(4)),
        other => panic!("expected update after reconnect, got {:?}", other),
    }

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_mutation_result_preserves_int64() {
    let server = TestServer::bind().await;
    let client = client_for(&server);
    let mut conn = server.accept().await;
    client.wait_for_connection(STEP).await.expect("connected");

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.mutation("counters:bump", Value::object([("by", Value::Int64(2))])).await }
    });

    let request_id = match conn.recv().await {
        WireMessage::Request {
            kind: RequestKind::Mutation,
            request_id,
            path,
            args,
        } => {
            assert_eq!(path, "counters:bump");
            assert_eq!(args.get("by"), Some(&Value::Int64(2)));
            request_id
        },
        other => panic!("expected mutation, got {:?}", other),
    };

    // Raw frame so the `$int64` marker is exercised on the way in.
    conn.send_raw(&format!(
        r#"{{"type":"mutationResult","requestId":"{}","success":true,"value":{{"$int64":"9007199254740993"}},"logLines":[]}}"#,
        request_id
    ))
    .await;

    let value = pending.await.expect("join").expect("mutation ok");
    assert_eq!(value, Value::Int64(9_007_199_254_740_993));

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_failed_action_is_server_error() {
    let server = TestServer::bind().await;
    let client = client_for(&server);
    let mut conn = server.accept().await;
    client.wait_for_connection(STEP).await.expect("connected");

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.action("billing:charge", Value::Null).await }
    });

    let request_id = match conn.recv().await {
        WireMessage::Request {
            kind: RequestKind::Action,
            request_id,
            ..
        } => request_id,
        other => panic!("expected action, got {:?}", other),
    };
    conn.send(&WireMessage::RequestResult {
        kind: RequestKind::Action,
        request_id,
        success: false,
        value: Value::from("card declined"),
        log_lines: Vec::new(),
        error_code: Some("DECLINED".to_string()),
    })
    .await;

    let err = pending.await.expect("join").unwrap_err();
    assert_eq!(
        err,
        SyncLinkError::ServerError {
            message: "card declined".to_string(),
            code: Some("DECLINED".to_string()),
        }
    );

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_server_ping_is_answered_with_pong() {
    let server = TestServer::bind().await;
    let client = client_for(&server);
    let mut conn = server.accept().await;
    client.wait_for_connection(STEP).await.expect("connected");

    conn.send(&WireMessage::Ping).await;
    let pong = conn.recv_until(|m| matches!(m, WireMessage::Pong)).await;
    assert_eq!(pong, WireMessage::Pong);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_mutation_while_disconnected_is_rejected() {
    let server = TestServer::bind().await;
    let options = ConnectionOptions::default().with_auto_reconnect(false);
    let client = client_with_options(&server, options);
    let conn = server.accept().await;
    client.wait_for_connection(STEP).await.expect("connected");

    conn.kill();
    let mut state_wait = Duration::ZERO;
    while client.connection_state() == ConnectionState::Open && state_wait < STEP {
        tokio::time::sleep(Duration::from_millis(10)).await;
        state_wait += Duration::from_millis(10);
    }
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let err = client.mutation("x:y", Value::Null).await.unwrap_err();
    assert_eq!(err, SyncLinkError::NotConnected);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_close_is_terminal_and_idempotent() {
    let server = TestServer::bind().await;
    let client = client_for(&server);
    let _conn = server.accept().await;
    client.wait_for_connection(STEP).await.expect("connected");

    let mut live = client.subscribe("a:b", None).await.expect("subscribe");
    client.close().await.expect("close");
    client.close().await.expect("second close");

    // An open connection reports the disconnect before the completion.
    let mut event = next_event(&mut live).await;
    if event == SubscriptionEvent::Disconnected {
        event = next_event(&mut live).await;
    }
    assert_eq!(event, SubscriptionEvent::Complete);
    assert!(client.subscribe("a:b", None).await.is_err());
}

#[tokio::test]
async fn test_give_up_fails_live_queries_when_enabled() {
    let (client, mut exhausted_rx) = give_up_client(true).await;
    let mut live = client.subscribe("messages:list", None).await.expect("subscribe offline");
    let id = live.id();

    let mut event = next_event(&mut live).await;
    while event == SubscriptionEvent::Disconnected {
        event = next_event(&mut live).await;
    }
    match event {
        SubscriptionEvent::Error(err) => {
            assert_eq!(err.code.as_deref(), Some("RECONNECT_EXHAUSTED"));
        },
        other => panic!("expected give-up error, got {:?}", other),
    }

    let attempts = timeout(STEP, exhausted_rx.recv()).await.expect("exhausted in time");
    assert_eq!(attempts, Some(3));
    wait_for_state(&client, ConnectionState::Disconnected).await;

    let info = client.subscription(id).await.expect("lookup").expect("handle kept");
    assert_eq!(info.status, SubscriptionStatus::Error);

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_give_up_keeps_live_queries_pending_by_default() {
    let (client, mut exhausted_rx) = give_up_client(false).await;
    let mut live = client.subscribe("messages:list", None).await.expect("subscribe offline");

    let attempts = timeout(STEP, exhausted_rx.recv()).await.expect("exhausted in time");
    assert_eq!(attempts, Some(3));
    wait_for_state(&client, ConnectionState::Disconnected).await;

    let info = client.subscription(live.id()).await.expect("lookup").expect("handle kept");
    assert_eq!(info.status, SubscriptionStatus::Pending);
    assert_eq!(info.error, None);
    assert!(
        timeout(Duration::from_millis(100), live.next()).await.is_err(),
        "no event expected after a silent give-up"
    );

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_unanswered_ping_forces_reconnect() {
    let server = TestServer::bind().await;
    let timeouts = SyncLinkTimeouts::builder()
        .connection_timeout(Duration::from_secs(2))
        .keepalive_interval(Duration::from_millis(100))
        .pong_timeout(Duration::from_millis(150))
        .request_timeout(Duration::from_secs(5))
        .build();
    let client = SyncLinkClient::builder()
        .base_url(server.base_url())
        .timeouts(timeouts)
        .connection_options(ConnectionOptions::default().with_reconnect_delay_ms(20))
        .build()
        .expect("build client");

    let mut conn = server.accept().await;
    client.wait_for_connection(STEP).await.expect("connected");

    // An answered ping keeps the connection and the next ping follows on it.
    conn.recv_until(|m| matches!(m, WireMessage::Ping)).await;
    conn.send(&WireMessage::Pong).await;
    conn.recv_until(|m| matches!(m, WireMessage::Ping)).await;

    // Left unanswered, the pong timeout drops the socket and a new one opens.
    let _stale = conn;
    let _fresh = server.accept().await;
    client.wait_for_connection(STEP).await.expect("reconnected");

    client.close().await.expect("close");
}
