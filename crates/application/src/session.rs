//! 客户端会话
//!
//! 每个连接对应一个会话，包含两个泵：
//! - 入站泵：读取帧、解码信封、以会话身份转发给调度器
//! - 出站泵：清空私有出站队列并写回连接
//!
//! 任意一个泵结束，会话即进入注销流程。

use config::HubConfig;
use domain::{ClientId, Envelope, RoomId, SessionId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::command::{Command, OutboundFrame, Registration, Relay};
use crate::transport::{Frame, FrameSink, FrameSource};

/// 会话生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    Active,
    Unregistering,
    Closed,
}

/// 会话状态的只读句柄
#[derive(Clone)]
pub struct SessionObserver {
    session_id: SessionId,
    client_id: ClientId,
    state: watch::Receiver<SessionState>,
}

impl SessionObserver {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// 等待两个泵都退出
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }
}

pub struct ClientSession {
    client_id: ClientId,
    session_id: SessionId,
    outbound: mpsc::Receiver<OutboundFrame>,
    commands: mpsc::Sender<Command>,
    state: watch::Sender<SessionState>,
    max_frame_bytes: usize,
}

impl ClientSession {
    /// 创建会话及其注册命令。出站队列的发送端随注册命令交给登记表。
    pub fn open(
        client_id: ClientId,
        room: Option<RoomId>,
        commands: mpsc::Sender<Command>,
        config: &HubConfig,
    ) -> (Self, Registration) {
        let session_id = SessionId::new();
        let (outbound_tx, outbound) = mpsc::channel(config.outbound_queue_capacity);
        let (state, _) = watch::channel(SessionState::Connecting);

        let registration = Registration {
            client_id: client_id.clone(),
            session_id,
            room,
            outbound: outbound_tx,
        };
        let session = Self {
            client_id,
            session_id,
            outbound,
            commands,
            state,
            max_frame_bytes: config.max_frame_bytes,
        };
        (session, registration)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn observer(&self) -> SessionObserver {
        SessionObserver {
            session_id: self.session_id,
            client_id: self.client_id.clone(),
            state: self.state.subscribe(),
        }
    }

    pub(crate) fn mark_registered(&self) {
        self.state.send_replace(SessionState::Registered);
    }

    /// 启动两个泵并等待会话结束
    pub async fn run<R, W>(self, reader: R, writer: W)
    where
        R: FrameSource,
        W: FrameSink,
    {
        let Self {
            client_id,
            session_id,
            outbound,
            commands,
            state,
            max_frame_bytes,
        } = self;

        state.send_replace(SessionState::Active);
        info!(client_id = %client_id, session_id = %session_id, "session active");

        let inbound = InboundPump {
            client_id: client_id.clone(),
            session_id,
            commands: commands.clone(),
            max_frame_bytes,
        };
        let mut inbound_task = tokio::spawn(inbound.run(reader));
        let mut outbound_task = tokio::spawn(outbound_pump(client_id.clone(), outbound, writer));

        let inbound_finished_first = tokio::select! {
            _ = &mut inbound_task => true,
            _ = &mut outbound_task => false,
        };

        state.send_replace(SessionState::Unregistering);
        let unregister = Command::Unregister {
            client_id: client_id.clone(),
            session_id: Some(session_id),
        };
        if commands.send(unregister).await.is_err() {
            debug!(client_id = %client_id, "hub already closed, skipping unregister");
        }

        if inbound_finished_first {
            // 注销后出站队列关闭，写泵会发出关闭帧后自行退出
            let _ = outbound_task.await;
        } else {
            inbound_task.abort();
            let _ = inbound_task.await;
        }

        state.send_replace(SessionState::Closed);
        info!(client_id = %client_id, session_id = %session_id, "session closed");
    }
}

struct InboundPump {
    client_id: ClientId,
    session_id: SessionId,
    commands: mpsc::Sender<Command>,
    max_frame_bytes: usize,
}

impl InboundPump {
    async fn run<R: FrameSource>(self, mut reader: R) {
        while let Some(frame) = reader.next().await {
            let text = match frame {
                Ok(Frame::Text(text)) => text,
                Ok(Frame::Close) => break,
                Err(err) => {
                    debug!(client_id = %self.client_id, error = %err, "read failed");
                    break;
                }
            };

            let envelope = match Envelope::decode(&text, self.max_frame_bytes) {
                Ok(envelope) => envelope,
                Err(err) => {
                    debug!(client_id = %self.client_id, error = %err, "dropping inbound frame");
                    continue;
                }
            };

            let command = self.stamp(envelope);
            if self.commands.send(command).await.is_err() {
                debug!(client_id = %self.client_id, "hub closed, stopping inbound pump");
                break;
            }
        }
    }

    /// 信封里的 `user_id` 一律以会话身份为准；目标房间由调度器在执行时解析
    fn stamp(&self, envelope: Envelope) -> Command {
        Command::Relay(Relay {
            client_id: self.client_id.clone(),
            session_id: self.session_id,
            requested_room: envelope.room(),
            event_type: envelope.event_type,
            payload: envelope.data,
        })
    }
}

async fn outbound_pump<W: FrameSink>(
    client_id: ClientId,
    mut queue: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
) {
    while let Some(payload) = queue.recv().await {
        if let Err(err) = writer.send(Frame::Text(payload.to_string())).await {
            warn!(client_id = %client_id, error = %err, "write failed, closing session");
            return;
        }
    }

    if let Err(err) = writer.send(Frame::Close).await {
        debug!(client_id = %client_id, error = %err, "close frame not delivered");
    }
    let _ = writer.close().await;
}
