//! Routes decoded messages from the I/O thread onto typed event queues for
//! the simulation to consume.

use std::sync::Arc;

use acre::net::events::EventQueue;
use acre::net::messages::{
    ConnectionResponse, ExplicitConfirmation, Heartbeat, MessageDropInfo, MessageType,
    MovementUpdate,
};
use acre::net::wire::{self, WireError};

/// Terminal connection transitions, emitted by the I/O thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection attempt never got off the ground.
    Failed,
    /// An established connection went away.
    Disconnected,
}

/// What the NPC replication buffer gets fed for each received message.
#[derive(Debug, Clone)]
pub enum NpcUpdate {
    /// Real entity data for the update's tick, implicitly confirming every
    /// tick before it.
    Update(Arc<MovementUpdate>),
    /// No changes for the given number of ticks.
    ExplicitConfirmation(u8),
}

/// The network event dispatcher: one queue per event the simulation cares
/// about. The I/O thread produces, the simulation consumes.
#[derive(Debug, Default)]
pub struct NetEventQueues {
    pub connection_responses: EventQueue<ConnectionResponse>,
    pub player_updates: EventQueue<Arc<MovementUpdate>>,
    pub npc_updates: EventQueue<NpcUpdate>,
    pub drop_infos: EventQueue<MessageDropInfo>,
    pub connection_errors: EventQueue<ConnectionError>,
}

impl NetEventQueues {
    pub fn clear_all(&self) {
        self.connection_responses.clear();
        self.player_updates.clear();
        self.npc_updates.clear();
        self.drop_infos.clear();
        self.connection_errors.clear();
    }
}

pub struct MessageProcessor {
    queues: Arc<NetEventQueues>,
}

impl MessageProcessor {
    pub fn new(queues: Arc<NetEventQueues>) -> Self {
        Self { queues }
    }

    /// Deserializes one message and pushes the matching event(s).
    ///
    /// Movement updates fan out to both the player and NPC queues: the
    /// prediction core wants the owned entity's state, the replication
    /// buffer wants everyone else's, and both need the update's tick.
    pub fn process_received_message(
        &self,
        message_type: MessageType,
        body: &[u8],
    ) -> Result<(), WireError> {
        match message_type {
            MessageType::ConnectionResponse => {
                let response: ConnectionResponse = wire::decode_message(body)?;
                self.queues.connection_responses.push(response);
            }
            MessageType::MovementUpdate => {
                let update: Arc<MovementUpdate> = Arc::new(wire::decode_message(body)?);
                self.queues.player_updates.push(Arc::clone(&update));
                self.queues.npc_updates.push(NpcUpdate::Update(update));
            }
            MessageType::ExplicitConfirmation => {
                let confirmation: ExplicitConfirmation = wire::decode_message(body)?;
                self.queues
                    .npc_updates
                    .push(NpcUpdate::ExplicitConfirmation(
                        confirmation.confirmed_tick_count,
                    ));
            }
            MessageType::MessageDropInfo => {
                let info: MessageDropInfo = wire::decode_message(body)?;
                self.queues.drop_infos.push(info);
            }
            MessageType::Heartbeat => {
                // Pure keep-alive; receiving the bytes already fed the
                // peer's receive timer.
                let heartbeat: Heartbeat = wire::decode_message(body)?;
                log::debug!("server heartbeat for tick {}", heartbeat.tick);
            }
            other => {
                // Client-to-server message types have no business arriving
                // here; treat it as a framing-level violation.
                return Err(WireError::BadMessageType(other as u8));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acre::SharedConfig;
    use acre::net::messages::Heartbeat;
    use acre::net::wire::encode_message;

    fn processor() -> (MessageProcessor, Arc<NetEventQueues>) {
        let queues = Arc::new(NetEventQueues::default());
        (MessageProcessor::new(Arc::clone(&queues)), queues)
    }

    fn body_of(record: Vec<u8>) -> Vec<u8> {
        record[acre::MESSAGE_HEADER_SIZE..].to_vec()
    }

    #[test]
    fn movement_update_fans_out_to_both_queues() {
        let (processor, queues) = processor();
        let shared = SharedConfig::default();

        let update = MovementUpdate::new(42);
        let body = body_of(encode_message(&update, &shared).unwrap());
        processor
            .process_received_message(MessageType::MovementUpdate, &body)
            .unwrap();

        let player_update = queues.player_updates.pop().unwrap();
        assert_eq!(player_update.tick, 42);
        match queues.npc_updates.pop().unwrap() {
            NpcUpdate::Update(npc_update) => assert_eq!(npc_update.tick, 42),
            other => panic!("expected an update, got {other:?}"),
        }
    }

    #[test]
    fn explicit_confirmation_reaches_the_npc_queue() {
        let (processor, queues) = processor();
        let shared = SharedConfig::default();

        let confirmation = ExplicitConfirmation {
            confirmed_tick_count: 3,
        };
        let body = body_of(encode_message(&confirmation, &shared).unwrap());
        processor
            .process_received_message(MessageType::ExplicitConfirmation, &body)
            .unwrap();

        assert!(queues.player_updates.is_empty());
        match queues.npc_updates.pop().unwrap() {
            NpcUpdate::ExplicitConfirmation(count) => assert_eq!(count, 3),
            other => panic!("expected a confirmation, got {other:?}"),
        }
    }

    #[test]
    fn server_bound_types_are_rejected() {
        let (processor, _queues) = processor();
        let shared = SharedConfig::default();

        let inputs = acre::net::messages::ClientInputs {
            tick: 1,
            inputs: Default::default(),
        };
        let body = body_of(encode_message(&inputs, &shared).unwrap());
        let result = processor.process_received_message(MessageType::ClientInputs, &body);
        assert!(matches!(result, Err(WireError::BadMessageType(_))));
    }

    #[test]
    fn server_heartbeats_are_benign() {
        let (processor, queues) = processor();
        let shared = SharedConfig::default();

        let body = body_of(encode_message(&Heartbeat { tick: 7 }, &shared).unwrap());
        processor
            .process_received_message(MessageType::Heartbeat, &body)
            .unwrap();
        assert!(queues.npc_updates.is_empty());
        assert!(queues.player_updates.is_empty());
    }
}
