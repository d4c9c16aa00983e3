//! 在线状态登记表
//!
//! 写路径只属于调度器；房间成员表额外放在 [`PresenceView`] 里，
//! 供查询方在短暂的读锁下复制快照。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{ClientId, RoomId, SessionId};
use parking_lot::RwLock;
use tokio::sync::{mpsc, mpsc::error::TrySendError};

use crate::command::{OutboundFrame, Registration};
use crate::error::HubError;

type RoomMap = HashMap<RoomId, HashSet<ClientId>>;

/// 房间成员表的只读视图，可随意克隆
#[derive(Clone, Default)]
pub struct PresenceView {
    rooms: Arc<RwLock<RoomMap>>,
}

impl PresenceView {
    pub fn online_count(&self, room_id: &RoomId) -> usize {
        self.rooms.read().get(room_id).map_or(0, HashSet::len)
    }

    pub fn online_users(&self, room_id: &RoomId) -> HashSet<ClientId> {
        self.rooms.read().get(room_id).cloned().unwrap_or_default()
    }

    /// 当前有人在线的房间数
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    fn members(&self, room_id: &RoomId) -> Vec<ClientId> {
        self.rooms
            .read()
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn insert(&self, room_id: &RoomId, client_id: ClientId) {
        self.rooms
            .write()
            .entry(room_id.clone())
            .or_default()
            .insert(client_id);
    }

    fn remove(&self, room_id: &RoomId, client_id: &ClientId) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room_id) {
            members.remove(client_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    fn clear(&self) {
        self.rooms.write().clear();
    }
}

struct SessionEntry {
    session_id: SessionId,
    room: Option<RoomId>,
    outbound: mpsc::Sender<OutboundFrame>,
}

/// 被移除的会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub session_id: SessionId,
    pub room: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomChange {
    pub previous: Option<RoomId>,
    pub current: Option<RoomId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 消费太慢，出站队列已满
    QueueFull,
    /// 写泵已经退出
    QueueClosed,
}

#[derive(Debug, Default)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: Vec<(ClientId, DropReason)>,
}

/// 客户端 -> 会话，以及房间 -> 成员。
///
/// 不变式：客户端出现在某房间的成员集合中，当且仅当它已登记且当前房间就是该房间。
pub struct Registry {
    clients: HashMap<ClientId, SessionEntry>,
    presence: PresenceView,
}

impl Registry {
    pub fn new(presence: PresenceView) -> Self {
        Self {
            clients: HashMap::new(),
            presence,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn session_of(&self, client_id: &ClientId) -> Option<SessionId> {
        self.clients.get(client_id).map(|entry| entry.session_id)
    }

    /// 会话当前所在房间。客户端未登记或 `session_id` 已被顶替时返回 `None`。
    pub fn session_room(
        &self,
        client_id: &ClientId,
        session_id: SessionId,
    ) -> Option<Option<RoomId>> {
        self.clients
            .get(client_id)
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.room.clone())
    }

    pub fn online_count(&self, room_id: &RoomId) -> usize {
        self.presence.online_count(room_id)
    }

    /// 登记会话。同一客户端已有的会话会被挤掉并返回。
    pub fn register(&mut self, registration: Registration) -> Option<Departure> {
        let Registration {
            client_id,
            session_id,
            room,
            outbound,
        } = registration;

        let evicted = self.remove(&client_id);
        if let Some(room_id) = &room {
            self.presence.insert(room_id, client_id.clone());
        }
        self.clients.insert(
            client_id,
            SessionEntry {
                session_id,
                room,
                outbound,
            },
        );
        evicted
    }

    /// 幂等注销；`session_id` 与当前登记的会话不符时不做任何事。
    pub fn unregister(
        &mut self,
        client_id: &ClientId,
        session_id: Option<SessionId>,
    ) -> Option<Departure> {
        if let Some(expected) = session_id {
            if self.session_of(client_id) != Some(expected) {
                return None;
            }
        }
        self.remove(client_id)
    }

    pub fn move_to_room(
        &mut self,
        client_id: &ClientId,
        session_id: Option<SessionId>,
        room: Option<RoomId>,
    ) -> Option<RoomChange> {
        let entry = self.clients.get_mut(client_id)?;
        if session_id.is_some_and(|expected| expected != entry.session_id) {
            return None;
        }

        let previous = entry.room.clone();
        if previous != room {
            if let Some(old) = &previous {
                self.presence.remove(old, client_id);
            }
            if let Some(new) = &room {
                self.presence.insert(new, client_id.clone());
            }
            entry.room = room.clone();
        }

        Some(RoomChange {
            previous,
            current: room,
        })
    }

    /// 向房间内每个成员非阻塞地投递一帧。
    ///
    /// 投递失败的成员只被收集，不在这里移除；由调度器按注销流程处理。
    pub fn fan_out(&self, room_id: &RoomId, frame: &OutboundFrame) -> Result<FanOut, HubError> {
        let mut fan_out = FanOut::default();

        for client_id in self.presence.members(room_id) {
            let entry = self.clients.get(&client_id).ok_or_else(|| {
                HubError::corrupted(format!(
                    "room {room_id} lists client {client_id} without a session"
                ))
            })?;
            if entry.room.as_ref() != Some(room_id) {
                return Err(HubError::corrupted(format!(
                    "room {room_id} lists client {client_id} whose current room is {:?}",
                    entry.room
                )));
            }

            match entry.outbound.try_send(frame.clone()) {
                Ok(()) => fan_out.delivered += 1,
                Err(TrySendError::Full(_)) => fan_out.dropped.push((client_id, DropReason::QueueFull)),
                Err(TrySendError::Closed(_)) => {
                    fan_out.dropped.push((client_id, DropReason::QueueClosed))
                }
            }
        }

        Ok(fan_out)
    }

    /// 移除全部会话，关闭所有出站队列。返回移除的数量。
    pub fn clear(&mut self) -> usize {
        let count = self.clients.len();
        self.clients.clear();
        self.presence.clear();
        count
    }

    fn remove(&mut self, client_id: &ClientId) -> Option<Departure> {
        let SessionEntry {
            session_id, room, ..
        } = self.clients.remove(client_id)?;
        if let Some(room_id) = &room {
            self.presence.remove(room_id, client_id);
        }
        Some(Departure { session_id, room })
    }

    #[cfg(test)]
    pub(crate) fn check_invariant(&self) -> Result<(), HubError> {
        let rooms = self.presence.rooms.read();
        for (room_id, members) in rooms.iter() {
            if members.is_empty() {
                return Err(HubError::corrupted(format!("room {room_id} is empty")));
            }
            for client_id in members {
                let entry = self.clients.get(client_id);
                if entry.and_then(|entry| entry.room.as_ref()) != Some(room_id) {
                    return Err(HubError::corrupted(format!(
                        "{client_id} listed in {room_id}"
                    )));
                }
            }
        }
        for (client_id, entry) in &self.clients {
            if let Some(room_id) = &entry.room {
                if !rooms.get(room_id).is_some_and(|m| m.contains(client_id)) {
                    return Err(HubError::corrupted(format!(
                        "{client_id} missing from {room_id}"
                    )));
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&self, room_id: &RoomId, client_id: ClientId) {
        self.presence.insert(room_id, client_id);
    }
}
