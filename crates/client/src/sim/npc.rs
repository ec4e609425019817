//! Replication of non-owned entities.
//!
//! Received updates are ordered into a per-tick buffer and consumed a fixed
//! offset behind the local tick, so network jitter turns into latency
//! instead of stutter. Ticks the server said nothing about are filled with
//! synthesized confirmations, which is what lets the buffer be consumed
//! strictly in order with no gaps.

use std::collections::VecDeque;
use std::sync::Arc;

use acre::net::messages::MovementUpdate;
use acre::sim::movement;
use acre::sim::world::{EntityId, EntityKind, World};

use super::SimError;
use crate::net::{NetEventQueues, NpcUpdate};

/// One slot in the replication buffer: a tick, and whether the server
/// reported any change for it.
#[derive(Debug)]
struct NpcStateUpdate {
    tick: u32,
    update: Option<Arc<MovementUpdate>>,
}

pub struct NpcMovementSystem {
    buffer: VecDeque<NpcStateUpdate>,
    /// Newest server tick we've received or confirmed.
    last_received_tick: u32,
    /// Newest server tick we've applied to the world.
    last_processed_tick: u32,
    /// Negative bias from the local tick at which buffered state is
    /// consumed.
    replication_offset: i32,
}

impl NpcMovementSystem {
    pub fn new(initial_replication_offset: i32) -> Self {
        Self {
            buffer: VecDeque::new(),
            last_received_tick: 0,
            last_processed_tick: 0,
            replication_offset: initial_replication_offset,
        }
    }

    pub fn reset(&mut self, initial_replication_offset: i32) {
        self.buffer.clear();
        self.last_received_tick = 0;
        self.last_processed_tick = 0;
        self.replication_offset = initial_replication_offset;
    }

    pub fn replication_offset(&self) -> i32 {
        self.replication_offset
    }

    /// Retunes the replication offset with an adjustment from the tick-sync
    /// protocol.
    ///
    /// We set ourselves ahead of the server by our latency, which makes
    /// received data appear twice as far in the past, so the adjustment is
    /// doubled and negated before applying. An offset that reaches the
    /// present means the configuration never left room for the buffer to
    /// work.
    pub fn apply_adjustment(&mut self, adjustment: i32) -> Result<(), SimError> {
        self.replication_offset += -2 * adjustment;

        if self.replication_offset >= 0 {
            return Err(SimError::ReplicationOffsetInvalid {
                offset: self.replication_offset,
            });
        }
        Ok(())
    }

    /// One replication step: ingest received updates, then consume every
    /// buffered tick up to the desired replication tick.
    pub fn process(
        &mut self,
        world: &mut World,
        queues: &NetEventQueues,
        owned: EntityId,
        current_tick: u32,
        dt: f32,
    ) -> Result<(), SimError> {
        self.receive_updates(queues);

        let desired_tick = i64::from(current_tick) + i64::from(self.replication_offset);
        if desired_tick < 0 {
            return Ok(());
        }
        let desired_tick = desired_tick as u32;

        let mut updated = false;
        while self.last_processed_tick < desired_tick {
            let Some(entry) = self.buffer.front() else {
                break;
            };
            updated = true;

            // Move everyone as if their inputs didn't change, then correct
            // with whatever the server actually said.
            move_all_npcs(world, owned, dt);
            if entry.tick != self.last_processed_tick + 1 {
                return Err(SimError::NpcUpdateOutOfOrder {
                    expected: self.last_processed_tick + 1,
                    actual: entry.tick,
                });
            }

            if let Some(update) = &entry.update {
                apply_update(world, owned, update);
            }

            self.last_processed_tick += 1;
            self.buffer.pop_front();
        }

        // Initialized, owed a tick, and had nothing to consume: the buffer
        // ran dry. Warn and retry next tick.
        if !updated && self.last_received_tick != 0 && self.last_processed_tick < desired_tick {
            log::warn!(
                "tick passed with no npc update. last processed: {}, desired: {}, offset: {}",
                self.last_processed_tick,
                desired_tick,
                self.replication_offset
            );
        }

        Ok(())
    }

    fn receive_updates(&mut self, queues: &NetEventQueues) {
        while let Some(update) = queues.npc_updates.pop() {
            match update {
                NpcUpdate::Update(update) => self.handle_update(update),
                NpcUpdate::ExplicitConfirmation(count) => {
                    // Confirmations before the first real update carry no
                    // ordering information we can anchor to.
                    if self.last_received_tick != 0 {
                        for _ in 0..count {
                            self.push_confirmation();
                        }
                    }
                }
            }
        }
    }

    fn handle_update(&mut self, update: Arc<MovementUpdate>) {
        let new_tick = update.tick;

        if self.last_received_tick != 0 {
            // The update implicitly confirms every tick since the last one
            // we heard about.
            self.handle_implicit_confirmation(new_tick.saturating_sub(1));
        } else {
            // First update: start processing just behind it so tick numbers
            // line up incrementally from here on.
            self.last_processed_tick = new_tick - 1;
        }

        self.buffer.push_back(NpcStateUpdate {
            tick: new_tick,
            update: Some(update),
        });
        self.last_received_tick = new_tick;
    }

    fn handle_implicit_confirmation(&mut self, confirmed_tick: u32) {
        while self.last_received_tick < confirmed_tick {
            self.push_confirmation();
        }
    }

    fn push_confirmation(&mut self) {
        self.last_received_tick += 1;
        self.buffer.push_back(NpcStateUpdate {
            tick: self.last_received_tick,
            update: None,
        });
    }
}

/// Advances every non-owned entity one tick under its current inputs.
fn move_all_npcs(world: &mut World, owned: EntityId, dt: f32) {
    let map = *world.map();
    for entity in world.entities_mut() {
        if entity.id == owned {
            continue;
        }

        entity.previous_position = entity.position;
        let inputs = entity.inputs;
        movement::move_entity(&mut entity.position, &mut entity.velocity, &inputs, &map, dt);
    }
}

/// Applies one tick's authoritative state to every non-owned entity it
/// mentions, spawning entities we're learning about for the first time.
fn apply_update(world: &mut World, owned: EntityId, update: &MovementUpdate) {
    for state in &update.entities {
        if state.entity == owned {
            continue;
        }

        if !world.contains(state.entity) {
            world.spawn_with_id(state.entity, EntityKind::Npc, state.position);
            log::debug!("learned about entity {} at tick {}", state.entity, update.tick);
        }

        let entity = world
            .get_mut(state.entity)
            .expect("spawned above if missing");
        entity.inputs = state.inputs;
        entity.velocity = state.velocity;
        entity.position = state.position;
    }
}
