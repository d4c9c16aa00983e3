//! 调度器命令
//!
//! 所有对在线状态的修改都以命令的形式进入同一个有序队列，由调度器串行执行。
//! 命令一旦入队便不再修改。

use std::sync::Arc;

use domain::{ClientId, EventType, RoomId, SessionId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// 已编码的出站帧，一次编码后在房间成员间共享
pub type OutboundFrame = Arc<str>;

pub enum Command {
    Register(Registration),
    /// `session_id` 为 `None` 时无条件移除该客户端；
    /// 否则只有当前登记的会话与之相同才移除。
    Unregister {
        client_id: ClientId,
        session_id: Option<SessionId>,
    },
    Broadcast(Broadcast),
    /// 客户端发来的帧，由调度器按执行时刻的房间决定广播还是换房间
    Relay(Relay),
    /// 切换客户端所在房间，`room` 为 `None` 表示离开所有房间
    MoveToRoom {
        client_id: ClientId,
        session_id: Option<SessionId>,
        room: Option<RoomId>,
        announce: bool,
    },
    /// 客户端仍在 `room` 时离开并广播 `leave`；已不在该房间则忽略
    LeaveRoom { client_id: ClientId, room: RoomId },
    /// 按执行时刻的在线人数向房间广播 `online_count`
    PublishOnlineCount(RoomId),
    /// 之前入队的命令全部执行完毕后应答
    Flush(oneshot::Sender<()>),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Register(_) => "register",
            Command::Unregister { .. } => "unregister",
            Command::Broadcast(_) => "broadcast",
            Command::Relay(_) => "relay",
            Command::MoveToRoom { .. } => "move_to_room",
            Command::LeaveRoom { .. } => "leave_room",
            Command::PublishOnlineCount(_) => "publish_online_count",
            Command::Flush(_) => "flush",
        }
    }
}

/// 注册命令携带的会话句柄。
///
/// `outbound` 是会话出站队列唯一的发送端，登记表删除该条目即关闭队列。
pub struct Registration {
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub room: Option<RoomId>,
    pub outbound: mpsc::Sender<OutboundFrame>,
}

/// 入站帧。`user_id` 已替换为会话身份，`room_id` 只作为 `join` 的目标房间。
#[derive(Debug, Clone)]
pub struct Relay {
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub event_type: EventType,
    pub requested_room: Option<RoomId>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct Broadcast {
    pub room_id: RoomId,
    pub event_type: EventType,
    /// `None` 表示系统消息
    pub sender: Option<ClientId>,
    pub payload: Value,
}

impl Broadcast {
    pub fn system(room_id: RoomId, event_type: EventType, payload: Value) -> Self {
        Self {
            room_id,
            event_type,
            sender: None,
            payload,
        }
    }
}
