//! 调度器：串行执行命令队列中的每一条命令
//!
//! 登记表只在这里被修改，因此成员变更与广播扇出天然线性有序。

use std::sync::Arc;

use domain::{ClientId, Envelope, EventType, RoomId, SessionId};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Broadcast, Command, OutboundFrame, Relay};
use crate::error::HubError;
use crate::registry::Registry;

pub struct Dispatcher {
    registry: Registry,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    allow_room_switch: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Registry,
        commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            commands,
            shutdown,
            allow_room_switch: true,
        }
    }

    /// 是否允许客户端用 `join` / `leave` 帧切换自己的房间
    pub fn allow_room_switch(mut self, allow: bool) -> Self {
        self.allow_room_switch = allow;
        self
    }

    /// 运行直到取消或登记表损坏。
    ///
    /// 退出时关闭命令队列，尽力执行已入队的命令，然后清空登记表，
    /// 使每个会话的写泵都能发出关闭帧。
    pub async fn run(mut self) -> Result<(), HubError> {
        info!("dispatcher started");
        let mut result = self.serve().await;

        self.commands.close();
        if result.is_ok() {
            while let Ok(command) = self.commands.try_recv() {
                if let Err(err) = self.apply(command) {
                    result = Err(err);
                    break;
                }
            }
        }

        if let Err(err) = &result {
            error!(error = %err, "dispatcher stopped on fatal error");
        }
        let closed = self.registry.clear();
        info!(sessions_closed = closed, "dispatcher stopped");
        self.shutdown.cancel();
        result
    }

    async fn serve(&mut self) -> Result<(), HubError> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command)?,
                    None => return Ok(()),
                },
            }
        }
    }

    fn apply(&mut self, command: Command) -> Result<(), HubError> {
        debug!(command = command.kind(), "applying command");
        match command {
            Command::Register(registration) => {
                let client_id = registration.client_id.clone();
                let session_id = registration.session_id;
                let room = registration.room.clone();
                if let Some(evicted) = self.registry.register(registration) {
                    info!(
                        client_id = %client_id,
                        session_id = %evicted.session_id,
                        "previous session replaced"
                    );
                }
                info!(
                    client_id = %client_id,
                    session_id = %session_id,
                    room_id = ?room.as_ref().map(RoomId::as_str),
                    "client registered"
                );
            }
            Command::Unregister {
                client_id,
                session_id,
            } => {
                if let Some(departure) = self.registry.unregister(&client_id, session_id) {
                    info!(
                        client_id = %client_id,
                        session_id = %departure.session_id,
                        room_id = ?departure.room.as_ref().map(RoomId::as_str),
                        "client unregistered"
                    );
                }
            }
            Command::Broadcast(broadcast) => self.broadcast(broadcast)?,
            Command::Relay(relay) => self.relay(relay)?,
            Command::MoveToRoom {
                client_id,
                session_id,
                room,
                announce,
            } => self.move_to_room(client_id, session_id, room, announce)?,
            Command::LeaveRoom { client_id, room } => self.leave_room(client_id, room)?,
            Command::PublishOnlineCount(room_id) => self.publish_online_count(room_id)?,
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
        Ok(())
    }

    fn broadcast(&mut self, broadcast: Broadcast) -> Result<(), HubError> {
        let Broadcast {
            room_id,
            event_type,
            sender,
            payload,
        } = broadcast;

        let envelope = Envelope::new(event_type, &room_id, sender.as_ref(), payload);
        let frame: OutboundFrame = match envelope.encode() {
            Ok(encoded) => Arc::from(encoded),
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "failed to encode envelope");
                return Ok(());
            }
        };

        let fan_out = self.registry.fan_out(&room_id, &frame)?;
        for (client_id, reason) in fan_out.dropped {
            warn!(
                client_id = %client_id,
                room_id = %room_id,
                reason = ?reason,
                "outbound queue unavailable, dropping client"
            );
            self.registry.unregister(&client_id, None);
        }
        debug!(
            room_id = %room_id,
            event_type = %envelope.event_type,
            delivered = fan_out.delivered,
            "broadcast delivered"
        );
        Ok(())
    }

    /// 房间在执行时刻解析，因此紧跟在 `join` 之后的帧一定落在新房间。
    fn relay(&mut self, relay: Relay) -> Result<(), HubError> {
        let Relay {
            client_id,
            session_id,
            event_type,
            requested_room,
            payload,
        } = relay;

        let Some(current) = self.registry.session_room(&client_id, session_id) else {
            debug!(
                client_id = %client_id,
                session_id = %session_id,
                "frame from replaced session dropped"
            );
            return Ok(());
        };

        if self.allow_room_switch {
            match &event_type {
                EventType::Join if requested_room.is_some() && requested_room != current => {
                    return self.move_to_room(client_id, Some(session_id), requested_room, true);
                }
                EventType::Leave if current.is_some() => {
                    return self.move_to_room(client_id, Some(session_id), None, true);
                }
                _ => {}
            }
        }

        let Some(room_id) = current else {
            debug!(
                client_id = %client_id,
                event_type = %event_type,
                "session has no room, dropping frame"
            );
            return Ok(());
        };
        self.broadcast(Broadcast {
            room_id,
            event_type,
            sender: Some(client_id),
            payload,
        })
    }

    fn move_to_room(
        &mut self,
        client_id: ClientId,
        session_id: Option<SessionId>,
        room: Option<RoomId>,
        announce: bool,
    ) -> Result<(), HubError> {
        let Some(change) = self.registry.move_to_room(&client_id, session_id, room) else {
            debug!(client_id = %client_id, "move ignored for unknown session");
            return Ok(());
        };
        if change.previous == change.current {
            return Ok(());
        }

        info!(
            client_id = %client_id,
            from = ?change.previous.as_ref().map(RoomId::as_str),
            to = ?change.current.as_ref().map(RoomId::as_str),
            "client switched room"
        );

        if !announce {
            return Ok(());
        }
        if let Some(previous) = change.previous {
            self.announce(&client_id, previous, EventType::Leave)?;
        }
        if let Some(current) = change.current {
            self.announce(&client_id, current, EventType::Join)?;
        }
        Ok(())
    }

    fn leave_room(&mut self, client_id: ClientId, room: RoomId) -> Result<(), HubError> {
        let current = self
            .registry
            .session_of(&client_id)
            .and_then(|session_id| self.registry.session_room(&client_id, session_id))
            .flatten();
        if current.as_ref() != Some(&room) {
            debug!(client_id = %client_id, room_id = %room, "leave ignored, client not in room");
            return Ok(());
        }
        self.move_to_room(client_id, None, None, true)
    }

    fn announce(
        &mut self,
        client_id: &ClientId,
        room_id: RoomId,
        event_type: EventType,
    ) -> Result<(), HubError> {
        self.broadcast(Broadcast {
            room_id: room_id.clone(),
            event_type,
            sender: Some(client_id.clone()),
            payload: json!({ "user_id": client_id }),
        })?;
        self.publish_online_count(room_id)
    }

    fn publish_online_count(&mut self, room_id: RoomId) -> Result<(), HubError> {
        let count = self.registry.online_count(&room_id);
        self.broadcast(Broadcast::system(
            room_id,
            EventType::OnlineCount,
            json!({ "count": count }),
        ))
    }
}
