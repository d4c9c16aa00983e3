//! 并发一致性测试
//!
//! 验证大量会话并发接入、退出和广播时在线状态与投递顺序保持一致

use std::sync::Arc;
use std::time::Duration;

use application::{Frame, Hub, SessionObserver, TransportError};
use config::HubConfig;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;

struct TestClient {
    to_hub: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_hub: mpsc::UnboundedReceiver<Frame>,
    observer: SessionObserver,
}

async fn connect(hub: &Hub, user_id: &str, room_id: &str) -> TestClient {
    let (to_hub, reader) = mpsc::unbounded();
    let (writer, from_hub) = mpsc::unbounded::<Frame>();
    let observer = hub
        .handle_connection(
            user_id,
            room_id,
            reader,
            writer.sink_map_err(|_| TransportError::Closed),
        )
        .await
        .expect("connect");
    TestClient {
        to_hub,
        from_hub,
        observer,
    }
}

async fn next_text(client: &mut TestClient) -> Value {
    let frame = timeout(Duration::from_secs(3), client.from_hub.next())
        .await
        .expect("frame in time")
        .expect("connection open");
    match frame {
        Frame::Text(text) => serde_json::from_str(&text).expect("json"),
        Frame::Close => panic!("unexpected close"),
    }
}

/// 测试并发接入与断开后在线状态的一致性
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connection_consistency() {
    let hub = Arc::new(Hub::start(HubConfig::default()));

    let connect_tasks: Vec<_> = (0..40)
        .map(|i| {
            let hub = hub.clone();
            tokio::spawn(async move {
                let room = if i % 2 == 0 { "even" } else { "odd" };
                connect(&hub, &format!("user-{i}"), room).await
            })
        })
        .collect();

    let mut clients = Vec::new();
    for task in connect_tasks {
        clients.push(task.await.expect("join"));
    }
    hub.flush().await.expect("flush");
    assert_eq!(hub.online_count("even"), 20);
    assert_eq!(hub.online_count("odd"), 20);

    // 一半客户端并发断开
    let leaving: Vec<_> = clients.drain(..20).collect();
    let disconnect_tasks: Vec<_> = leaving
        .into_iter()
        .map(|client| {
            tokio::spawn(async move {
                client.to_hub.close_channel();
                client.observer.closed().await;
            })
        })
        .collect();
    for task in disconnect_tasks {
        timeout(Duration::from_secs(3), task)
            .await
            .expect("disconnect in time")
            .expect("join");
    }

    hub.flush().await.expect("flush");
    assert_eq!(hub.online_count("even"), 10);
    assert_eq!(hub.online_count("odd"), 10);
    let expected: Vec<String> = (20..40)
        .filter(|i| i % 2 == 0)
        .map(|i| format!("user-{i}"))
        .collect();
    let mut even: Vec<String> = hub
        .online_users("even")
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    even.sort();
    assert_eq!(even, expected);

    hub.stop().await.expect("stop");
}

/// 同一发送方的消息按发送顺序到达每个成员
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_sender_ordering_under_concurrency() {
    let hub = Arc::new(Hub::start(HubConfig::default()));
    let mut listener = connect(&hub, "listener", "R1").await;
    let mut senders = Vec::new();
    for i in 0..4 {
        senders.push(connect(&hub, &format!("sender-{i}"), "R1").await);
    }
    hub.flush().await.expect("flush");

    for (i, sender) in senders.iter().enumerate() {
        let to_hub = sender.to_hub.clone();
        tokio::spawn(async move {
            for seq in 0..25 {
                let frame = json!({"type": "message", "data": {"seq": seq, "from": i}});
                to_hub
                    .unbounded_send(Ok(Frame::Text(frame.to_string())))
                    .expect("send");
            }
        });
    }

    let mut last_seen = [-1i64; 4];
    for _ in 0..100 {
        let frame = next_text(&mut listener).await;
        let from = frame["data"]["from"].as_u64().expect("from") as usize;
        let seq = frame["data"]["seq"].as_i64().expect("seq");
        assert_eq!(frame["user_id"], format!("sender-{from}"));
        assert_eq!(seq, last_seen[from] + 1);
        last_seen[from] = seq;
    }
    assert_eq!(last_seen, [24; 4]);

    hub.stop().await.expect("stop");
}
