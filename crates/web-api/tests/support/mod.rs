#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::Hub;
use axum::Router;
use config::HubConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn build_router(config: HubConfig) -> (Router, Arc<Hub>) {
    let hub = Arc::new(Hub::start(config));
    (router(AppState::new(hub.clone())), hub)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    shutdown: Option<oneshot::Sender<()>>,
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with(HubConfig::default()).await
}

pub async fn spawn_server_with(config: HubConfig) -> TestServer {
    let (router, hub) = build_router(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        hub,
        shutdown: Some(shutdown_tx),
    }
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self, user_id: &str, room_id: &str) -> WsClient {
        let url = format!(
            "ws://{}/ws?user_id={}&room_id={}",
            self.addr, user_id, room_id
        );
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        ws
    }

    /// 轮询直到房间在线人数达到预期
    pub async fn wait_for_count(&self, room_id: &str, expected: usize) {
        let hub = self.hub.clone();
        timeout(Duration::from_secs(3), async move {
            while hub.online_count(room_id) != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("room {room_id} never reached {expected} members"));
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(TungsteniteMessage::text(value.to_string()))
        .await
        .expect("send frame");
}

/// 读取下一条文本帧，跳过控制帧
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("frame in time")
            .expect("connection open")
            .expect("valid frame");
        match message {
            TungsteniteMessage::Text(payload) => {
                return serde_json::from_str(payload.as_str()).expect("json frame")
            }
            TungsteniteMessage::Close(_) => panic!("connection closed by server"),
            _ => continue,
        }
    }
}

/// 等待服务端关闭连接
pub async fn expect_close(ws: &mut WsClient) {
    loop {
        let next = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("close in time");
        match next {
            Some(Ok(TungsteniteMessage::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    }
}
