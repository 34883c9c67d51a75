mod common;

use common::{MemoryConnector, Mode, elapsed_ms, forwarding, next_status, send_text};
use futures_util::StreamExt;
use livefeed_client::{
    ClientConfig, ClientError, ConnectionState, ConnectionStatus, InboundMessage, RealtimeClient,
    TransportError,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

fn assert_close_to(actual_ms: u128, expected_ms: u128) {
    assert!(
        actual_ms >= expected_ms && actual_ms <= expected_ms + 5,
        "expected ~{expected_ms}ms, got {actual_ms}ms"
    );
}

#[tokio::test(start_paused = true)]
async fn processing_event_reaches_subscriber_once() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let (mut events, callback) = forwarding();
    client.subscribe("processing_event", callback);

    client.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();
    send_text(
        &mut server,
        r#"{"type":"processing_event","payload":{"fileId":"f1"},"timestamp":1700000000000}"#,
    )
    .await;

    let message = events.recv().await.unwrap();
    assert_eq!(
        message,
        InboundMessage::new(
            "processing_event",
            json!({"fileId": "f1"}),
            json!(1700000000000u64)
        )
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(100), events.recv())
            .await
            .is_err()
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_attempt() {
    let (connector, _accepted) = MemoryConnector::new();
    let client = common::client(&connector);

    let (a, b) = tokio::join!(client.connect(), client.connect());
    a.unwrap();
    b.unwrap();
    client.connect().await.unwrap();

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.retry_state().attempt, 0);
    let status = client.status();
    assert!(status.connected);
    assert!(!status.reconnecting);
    assert!(status.last_connected_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_first_connect_does_not_retry() {
    let (connector, _accepted) = MemoryConnector::new();
    connector.set_mode(Mode::Refuse);
    let client = common::client(&connector);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::Connect(_))
    ));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(
        client.status().last_error.as_deref(),
        Some("failed to connect: connection refused")
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_one_second() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();
    let opened = next_status(&mut updates).await;
    assert!(opened.connected);
    assert!(!opened.reconnecting);

    drop(server);
    let lost = next_status(&mut updates).await;
    let lost_at = Instant::now();
    assert!(!lost.connected);
    assert!(lost.reconnecting);
    assert_eq!(client.state(), ConnectionState::Reconnecting);
    assert_eq!(client.retry_state().attempt, 1);

    let _server = accepted.recv().await.unwrap();
    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert_close_to(elapsed_ms(lost_at, attempts[1]), 1000);

    let reopened = next_status(&mut updates).await;
    assert!(reopened.connected);
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.retry_state().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn clean_server_close_also_reconnects() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();
    next_status(&mut updates).await;

    server
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        }))
        .await
        .unwrap();

    let lost = next_status(&mut updates).await;
    assert!(lost.reconnecting);
    let _server = accepted.recv().await.unwrap();
    assert!(next_status(&mut updates).await.connected);
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn retries_give_up_after_five_attempts() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();
    assert!(next_status(&mut updates).await.connected);

    connector.set_mode(Mode::Refuse);
    drop(server);
    assert!(next_status(&mut updates).await.reconnecting);
    let lost_at = Instant::now();

    let last = next_status(&mut updates).await;
    assert!(!last.connected);
    assert!(!last.reconnecting);
    assert_eq!(
        last.last_error.as_deref(),
        Some("max reconnect attempts exceeded")
    );
    assert!(last.last_connected_at.is_some());
    assert_eq!(client.state(), ConnectionState::Closed);

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 6);
    let mut delays = vec![elapsed_ms(lost_at, attempts[1])];
    delays.extend(attempts[1..].windows(2).map(|w| elapsed_ms(w[0], w[1])));
    for (actual, expected) in delays.iter().zip([1000, 2000, 4000, 8000, 16000]) {
        assert_close_to(*actual, expected);
    }

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 6);
    assert!(matches!(
        updates.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn successful_retry_resets_attempts() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();
    next_status(&mut updates).await;

    connector.set_mode(Mode::Refuse);
    drop(server);
    assert!(next_status(&mut updates).await.reconnecting);

    while connector.attempt_count() < 2 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(client.retry_state().attempt, 2);
    connector.set_mode(Mode::Accept);

    let _server = accepted.recv().await.unwrap();
    assert!(next_status(&mut updates).await.connected);
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.retry_state().attempt, 0);

    let attempts = connector.attempts();
    assert_close_to(elapsed_ms(attempts[1], attempts[2]), 2000);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();
    next_status(&mut updates).await;
    drop(server);
    assert!(next_status(&mut updates).await.reconnecting);

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    let stopped = next_status(&mut updates).await;
    assert!(!stopped.connected);
    assert!(!stopped.reconnecting);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert!(matches!(
        updates.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_open_link() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();
    next_status(&mut updates).await;

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    let status = next_status(&mut updates).await;
    assert!(!status.connected);
    assert!(!status.reconnecting);

    match server.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert!(updates.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn disconnect_abandons_in_flight_connect() {
    let (connector, _accepted) = MemoryConnector::new();
    connector.set_mode(Mode::Stall);
    let client = common::client(&connector);

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    while connector.attempt_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(client.state(), ConnectionState::Connecting);

    client.disconnect().await.unwrap();
    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(ClientError::Cancelled)));
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn disconnect_when_idle_is_harmless() {
    let (connector, _accepted) = MemoryConnector::new();
    let client = common::client(&connector);

    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.status(), ConnectionStatus::default());

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn connect_while_reconnecting_retries_immediately() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();
    next_status(&mut updates).await;
    drop(server);
    assert!(next_status(&mut updates).await.reconnecting);
    let lost_at = Instant::now();

    client.connect().await.unwrap();
    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(elapsed_ms(lost_at, attempts[1]), 0);
    assert_eq!(client.retry_state().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_keeps_connection() {
    let (connector, mut accepted) = MemoryConnector::new();
    let (reports_tx, mut reports) = mpsc::unbounded_channel();
    let client = RealtimeClient::builder(common::endpoint())
        .connector(connector.clone())
        .diagnostics(move |e: &ClientError| {
            let _ = reports_tx.send(e.to_string());
        })
        .build();
    let (mut events, callback) = forwarding();
    client.subscribe("processing_event", callback);

    client.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();
    send_text(&mut server, "{{{ not json").await;
    send_text(&mut server, r#"{"type":"processing_event","payload":{"n":2}}"#).await;

    let message = events.recv().await.unwrap();
    assert_eq!(message.payload(), &json!({"n": 2}));
    let report = reports.recv().await.unwrap();
    assert!(report.starts_with("malformed message"), "{report}");
    assert!(reports.try_recv().is_err());
    assert_eq!(client.state(), ConnectionState::Open);
    assert!(client.status().connected);
}

#[tokio::test(start_paused = true)]
async fn send_requires_open_connection() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);

    assert!(matches!(
        client.send(&json!({"type": "ack"})),
        Err(ClientError::Transport(TransportError::NotOpen))
    ));

    client.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();
    client.send(&json!({"type": "ack", "fileId": "f1"})).unwrap();
    match server.next().await {
        Some(Ok(Message::Text(text))) => {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value, json!({"type": "ack", "fileId": "f1"}));
        }
        other => panic!("expected text frame, got {other:?}"),
    }

    client.disconnect().await.unwrap();
    assert!(matches!(
        client.send(&json!({"type": "ack"})),
        Err(ClientError::Transport(TransportError::NotOpen))
    ));
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_callback_is_never_called() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    let (mut kept, keep_cb) = forwarding();
    let (mut dropped, drop_cb) = forwarding();
    client.subscribe("processing_event", keep_cb);
    let cancelled = client.subscribe("processing_event", drop_cb);
    client.unsubscribe(&cancelled);
    client.unsubscribe(&cancelled);

    client.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();
    send_text(&mut server, r#"{"type":"processing_event","timestamp":1}"#).await;

    kept.recv().await.unwrap();
    assert!(dropped.try_recv().is_err());
    assert!(!cancelled.is_active());
}

#[tokio::test(start_paused = true)]
async fn custom_backoff_from_config() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = RealtimeClient::builder(common::endpoint())
        .config(ClientConfig::default().with_reconnect(Duration::from_millis(250), 2))
        .connector(connector.clone())
        .build();
    let mut updates = client.status_updates();

    client.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();
    next_status(&mut updates).await;
    connector.set_mode(Mode::Refuse);
    drop(server);
    next_status(&mut updates).await;
    let lost_at = Instant::now();

    let last = next_status(&mut updates).await;
    assert_eq!(
        last.last_error.as_deref(),
        Some("max reconnect attempts exceeded")
    );
    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 3);
    assert_close_to(elapsed_ms(lost_at, attempts[1]), 250);
    assert_close_to(elapsed_ms(attempts[1], attempts[2]), 500);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_client_closes_the_link() {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = common::client(&connector);
    client.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();

    drop(client);
    match server.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }
}
