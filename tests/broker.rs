use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use pulsar_client::client::transport::memory;
use pulsar_client::client::RequestBroker;
use pulsar_client::common::error::ClientError;
use pulsar_client::common::models::Message;

type Harness = (Arc<RequestBroker>, memory::ServerEnd, mpsc::UnboundedReceiver<Message>);

fn broker_with_reader(capacity: usize) -> Harness {
    let (sender, receiver, server) = memory::pair();
    let broker = Arc::new(RequestBroker::new("@alice", Arc::new(sender), capacity));
    let (live_tx, live_rx) = mpsc::unbounded_channel();
    broker.spawn_reader(receiver, live_tx);
    (broker, server, live_rx)
}

#[tokio::test]
async fn test_concurrent_requests_resolve_by_filter() {
    let (broker, mut server, _live) = broker_with_reader(64);
    let channels: Vec<String> = (0..5).map(|i| format!(":room{}", i)).collect();

    let mut tasks = Vec::new();
    for channel in &channels {
        let broker = broker.clone();
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            let reply = broker
                .request("join", &channel, Some(&channel), Duration::from_secs(2))
                .await;
            (channel, reply)
        }));
    }

    for _ in 0..channels.len() {
        server.next_body().await.unwrap();
    }
    for channel in channels.iter().rev() {
        server.reply(&format!("+join {}", channel));
    }

    for task in tasks {
        let (channel, reply) = task.await.unwrap();
        assert_eq!(reply.unwrap(), format!("+join {}", channel));
    }
    assert_eq!(broker.buffered(), 0);
}

#[tokio::test]
async fn test_live_traffic_bypasses_reply_buffer() {
    let (broker, mut server, mut live) = broker_with_reader(64);
    let task = {
        let broker = broker.clone();
        tokio::spawn(async move {
            broker.request("join", ":a", Some(":a"), Duration::from_secs(2)).await
        })
    };
    server.next_body().await.unwrap();
    server.deliver("@bob", ":a", "+join :a");
    server.reply("+join :a");

    assert_eq!(task.await.unwrap().unwrap(), "+join :a");
    assert_eq!(live.recv().await.unwrap().src, "@bob");
}

#[tokio::test]
async fn test_malformed_frames_do_not_disturb_requests() {
    let (broker, mut server, _live) = broker_with_reader(64);
    let task = {
        let broker = broker.clone();
        tokio::spawn(async move {
            broker.request("leave", ":a", Some(":a"), Duration::from_secs(2)).await
        })
    };
    server.next_body().await.unwrap();
    server.send_raw(b"\xff\xfe".to_vec());
    server.send_raw(b"plain text".to_vec());
    server.reply("+leave :a");
    assert_eq!(task.await.unwrap().unwrap(), "+leave :a");
}

#[tokio::test]
async fn test_late_reply_stays_available() {
    let (broker, mut server, _live) = broker_with_reader(64);
    let err = broker
        .request("chat", ":a", Some(":a"), Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }));
    assert_eq!(broker.pending(), 0);

    server.next_body().await.unwrap();
    server.reply("chat {\"name\":\":a\",\"chat\":[]}");
    while broker.buffered() == 0 {
        tokio::task::yield_now().await;
    }
    let reply = broker.request("chat", ":a", Some(":a"), Duration::from_millis(500)).await.unwrap();
    assert!(reply.starts_with("chat "));
}

#[tokio::test]
async fn test_hangup_disconnects_once_and_fails_waiters() {
    let (broker, mut server, _live) = broker_with_reader(64);
    let task = {
        let broker = broker.clone();
        tokio::spawn(async move {
            broker.request("join", ":a", None, Duration::from_secs(5)).await
        })
    };
    server.next_body().await.unwrap();
    assert_eq!(server.close_calls(), 0);
    drop(server);

    assert_eq!(task.await.unwrap().unwrap_err(), ClientError::Disconnected);
    assert!(!broker.is_connected());
    broker.disconnect().await;
}
