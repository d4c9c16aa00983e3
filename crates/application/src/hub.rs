//! 广播中心门面
//!
//! 持有调度器任务和命令队列的发送端。连接接入、房间广播与在线查询都从这里进入。

use std::collections::HashSet;

use config::HubConfig;
use domain::{ClientId, EventType, RoomId};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{Broadcast, Command};
use crate::dispatcher::Dispatcher;
use crate::error::HubError;
use crate::registry::{PresenceView, Registry};
use crate::session::{ClientSession, SessionObserver};
use crate::transport::{FrameSink, FrameSource};

pub struct Hub {
    commands: mpsc::Sender<Command>,
    presence: PresenceView,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<Result<(), HubError>>>>,
    config: HubConfig,
}

impl Hub {
    /// 启动调度器。必须在 tokio 运行时内调用。
    pub fn start(config: HubConfig) -> Self {
        let (commands, receiver) = mpsc::channel(config.command_queue_capacity);
        let presence = PresenceView::default();
        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(Registry::new(presence.clone()), receiver, shutdown.clone())
            .allow_room_switch(config.allow_client_room_switch);
        let handle = tokio::spawn(dispatcher.run());

        info!(
            command_queue_capacity = config.command_queue_capacity,
            outbound_queue_capacity = config.outbound_queue_capacity,
            allow_client_room_switch = config.allow_client_room_switch,
            "hub started"
        );
        Self {
            commands,
            presence,
            shutdown,
            dispatcher: Mutex::new(Some(handle)),
            config,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// 接入一个已建立的连接。
    ///
    /// 注册命令先于两个泵入队，之后会话在后台运行；返回的句柄可用于观察会话状态。
    /// `initial_room` 为空时会话不在任何房间。
    pub async fn handle_connection<R, W>(
        &self,
        identity: &str,
        initial_room: &str,
        reader: R,
        writer: W,
    ) -> Result<SessionObserver, HubError>
    where
        R: FrameSource,
        W: FrameSink,
    {
        let client_id = ClientId::new(identity)?;
        if !self.is_running() {
            return Err(HubError::Closed);
        }

        let (session, registration) = ClientSession::open(
            client_id,
            RoomId::parse(initial_room),
            self.commands.clone(),
            &self.config,
        );
        self.send(Command::Register(registration)).await?;
        session.mark_registered();

        let observer = session.observer();
        tokio::spawn(session.run(reader, writer));
        Ok(observer)
    }

    /// 以系统身份向房间广播，失败只记录日志。
    pub async fn broadcast_to_room(
        &self,
        room_id: &str,
        event_type: impl Into<EventType>,
        payload: Value,
    ) {
        let Some(room_id) = RoomId::parse(room_id) else {
            debug!("broadcast without room ignored");
            return;
        };
        let broadcast = Broadcast::system(room_id, event_type.into(), payload);
        self.submit(Command::Broadcast(broadcast)).await;
    }

    /// 以 `user_id` 的名义向房间广播；`user_id` 为空时等同系统消息
    pub async fn broadcast_as(
        &self,
        room_id: &str,
        user_id: &str,
        event_type: impl Into<EventType>,
        payload: Value,
    ) {
        let Some(room_id) = RoomId::parse(room_id) else {
            debug!("broadcast without room ignored");
            return;
        };
        let broadcast = Broadcast {
            room_id,
            event_type: event_type.into(),
            sender: ClientId::new(user_id).ok(),
            payload,
        };
        self.submit(Command::Broadcast(broadcast)).await;
    }

    /// 广播 `join` 事件，随后广播最新在线人数
    pub async fn announce_join(&self, room_id: &str, user_id: &str, data: Value) {
        self.announce(room_id, user_id, EventType::Join, data).await;
    }

    /// 广播 `leave` 事件，随后广播最新在线人数
    pub async fn announce_leave(&self, room_id: &str, user_id: &str, data: Value) {
        self.announce(room_id, user_id, EventType::Leave, data).await;
    }

    async fn announce(&self, room_id: &str, user_id: &str, event_type: EventType, data: Value) {
        let Some(room_id) = RoomId::parse(room_id) else {
            debug!(event_type = %event_type, "announcement without room ignored");
            return;
        };
        let broadcast = Broadcast {
            room_id: room_id.clone(),
            event_type,
            sender: ClientId::new(user_id).ok(),
            payload: data,
        };
        self.submit(Command::Broadcast(broadcast)).await;
        self.submit(Command::PublishOnlineCount(room_id)).await;
    }

    /// 把已连接的客户端移到另一个房间，`room_id` 为空表示离开当前房间。
    pub async fn move_to_room(
        &self,
        identity: &str,
        room_id: &str,
        announce: bool,
    ) -> Result<(), HubError> {
        let client_id = ClientId::new(identity)?;
        self.send(Command::MoveToRoom {
            client_id,
            session_id: None,
            room: RoomId::parse(room_id),
            announce,
        })
        .await
    }

    /// 客户端当前在 `room_id` 时让它离开，并向该房间广播 `leave` 与在线人数
    pub async fn leave_room(&self, identity: &str, room_id: &str) -> Result<(), HubError> {
        let client_id = ClientId::new(identity)?;
        let Some(room) = RoomId::parse(room_id) else {
            debug!(client_id = %client_id, "leave without room ignored");
            return Ok(());
        };
        self.send(Command::LeaveRoom { client_id, room }).await
    }

    /// 强制断开客户端
    pub async fn disconnect(&self, identity: &str) -> Result<(), HubError> {
        let client_id = ClientId::new(identity)?;
        self.send(Command::Unregister {
            client_id,
            session_id: None,
        })
        .await
    }

    pub fn online_count(&self, room_id: &str) -> usize {
        RoomId::parse(room_id).map_or(0, |room_id| self.presence.online_count(&room_id))
    }

    pub fn online_users(&self, room_id: &str) -> HashSet<ClientId> {
        RoomId::parse(room_id)
            .map(|room_id| self.presence.online_users(&room_id))
            .unwrap_or_default()
    }

    /// 等待此前入队的命令全部执行完
    pub async fn flush(&self) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Flush(ack)).await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// 调度器停止时返回
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// 停止调度器并关闭所有会话；调度器的致命错误在这里返回。
    pub async fn stop(&self) -> Result<(), HubError> {
        self.shutdown.cancel();
        let handle = self.dispatcher.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        let result = handle
            .await
            .map_err(|err| HubError::DispatcherFailed(err.to_string()))?;
        info!("hub stopped");
        result
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }

    async fn submit(&self, command: Command) {
        let kind = command.kind();
        if self.send(command).await.is_err() {
            warn!(command = kind, "hub closed, command discarded");
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
