use glam::Vec3;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::sim::input::InputStateVec;
use crate::sim::world::EntityId;

/// Wire tag for a single message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ConnectionRequest = 0,
    ConnectionResponse = 1,
    ClientInputs = 2,
    Heartbeat = 3,
    MovementUpdate = 4,
    ExplicitConfirmation = 5,
    MessageDropInfo = 6,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ConnectionRequest),
            1 => Some(Self::ConnectionResponse),
            2 => Some(Self::ClientInputs),
            3 => Some(Self::Heartbeat),
            4 => Some(Self::MovementUpdate),
            5 => Some(Self::ExplicitConfirmation),
            6 => Some(Self::MessageDropInfo),
            _ => None,
        }
    }
}

/// A message that can ride in a batch record: one schema per type tag.
pub trait Message: Serialize + DeserializeOwned {
    const TYPE: MessageType;
}

/// An axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn centered_at(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }
}

/// Sent by a client right after the stream connects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub name: Option<String>,
}

impl Message for ConnectionRequest {
    const TYPE: MessageType = MessageType::ConnectionRequest;
}

/// The server's answer to a connection request: everything the client needs
/// to set up its local player and aim its tick ahead of ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub entity: EntityId,
    pub tick: u32,
    pub spawn: Vec3,
    pub map_width: u32,
    pub map_height: u32,
}

impl Message for ConnectionResponse {
    const TYPE: MessageType = MessageType::ConnectionResponse;
}

/// A client's input state for the given tick.
///
/// Only sent on ticks where the input state changed; the server keeps the
/// last received state applied in between.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientInputs {
    pub tick: u32,
    pub inputs: InputStateVec,
}

impl Message for ClientInputs {
    const TYPE: MessageType = MessageType::ClientInputs;
}

/// Keep-alive carrying the sender's current tick, used for tick-diff
/// measurement when no other message flows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Heartbeat {
    pub tick: u32,
}

impl Message for Heartbeat {
    const TYPE: MessageType = MessageType::Heartbeat;
}

/// Snapshot of a single entity's movement state as of some tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity: EntityId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub inputs: InputStateVec,
    pub bounds: Option<Aabb>,
}

/// All entity movement changes relevant to one client for one server tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementUpdate {
    pub tick: u32,
    pub entities: Vec<EntityState>,
}

impl MovementUpdate {
    pub fn new(tick: u32) -> Self {
        Self {
            tick,
            entities: Vec::new(),
        }
    }
}

impl Message for MovementUpdate {
    const TYPE: MessageType = MessageType::MovementUpdate;
}

/// "Nothing changed" for some number of ticks; lets the receiver's
/// replication buffer advance without waiting for data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExplicitConfirmation {
    pub confirmed_tick_count: u8,
}

impl Message for ExplicitConfirmation {
    const TYPE: MessageType = MessageType::ExplicitConfirmation;
}

/// Tells a client that an input message it sent was dropped because its
/// tick fell outside the server's receive window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageDropInfo {
    pub tick: u32,
}

impl Message for MessageDropInfo {
    const TYPE: MessageType = MessageType::MessageDropInfo;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::input::{Input, InputState};

    #[test]
    fn type_tags_round_trip() {
        for tag in 0u8..7 {
            let message_type = MessageType::from_u8(tag).unwrap();
            assert_eq!(message_type as u8, tag);
        }
        assert!(MessageType::from_u8(7).is_none());
        assert!(MessageType::from_u8(255).is_none());
    }

    #[test]
    fn client_inputs_round_trip() {
        let mut inputs = InputStateVec::new();
        inputs.set(Input::Up, InputState::Pressed);
        let message = ClientInputs { tick: 105, inputs };

        let bytes = bincode::serialize(&message).unwrap();
        let decoded: ClientInputs = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded.tick, 105);
        assert!(decoded.inputs.is_pressed(Input::Up));
        assert!(!decoded.inputs.is_pressed(Input::Left));
    }

    #[test]
    fn movement_update_round_trip() {
        let mut update = MovementUpdate::new(205);
        update.entities.push(EntityState {
            entity: 7,
            position: Vec3::new(5.0, 4.5, 0.0),
            velocity: Vec3::new(0.0, -4.5, 0.0),
            inputs: InputStateVec::pressed(Input::Up),
            bounds: Some(Aabb::centered_at(Vec3::new(5.0, 4.5, 0.0), Vec3::splat(0.5))),
        });

        let bytes = bincode::serialize(&update).unwrap();
        let decoded: MovementUpdate = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded, update);
    }
}
