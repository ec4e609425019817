//! Owned-entity prediction: apply local inputs immediately, keep a bounded
//! input history, and reconcile against authoritative state when it
//! arrives.

use std::collections::VecDeque;

use acre::net::messages::{EntityState, MessageDropInfo, MovementUpdate};
use acre::sim::input::InputStateVec;
use acre::sim::movement;
use acre::sim::world::{EntityId, World};

use super::SimError;
use crate::net::NetEventQueues;

/// The owned entity's inputs for the most recent ticks.
///
/// Index 0 is the current tick (recorded at the start of the tick, before
/// movement runs), index 1 the tick before, and so on. The capacity bounds
/// how far behind the server may stamp an update we can still replay from.
#[derive(Debug)]
pub struct InputHistory {
    entries: VecDeque<InputStateVec>,
    capacity: usize,
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, inputs: InputStateVec) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(inputs);
    }

    pub fn get(&self, ticks_ago: u32) -> Option<&InputStateVec> {
        self.entries.get(ticks_ago as usize)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub struct PlayerMovementSystem {
    history: InputHistory,
}

impl PlayerMovementSystem {
    pub fn new(history_length: usize) -> Self {
        Self {
            history: InputHistory::new(history_length),
        }
    }

    /// Records this tick's input. Must happen before [`Self::process`] so
    /// the live input sits at history index 0 for the final advance.
    pub fn record_input(&mut self, inputs: InputStateVec) {
        self.history.record(inputs);
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// One prediction step for the owned entity.
    ///
    /// Drains authoritative updates, and if any mentioned us: snaps to the
    /// newest server state, then re-simulates every tick between the
    /// server's stamp and now from the input history. Finishes by advancing
    /// one step with the live input, which is what the player sees this
    /// tick.
    pub fn process(
        &mut self,
        world: &mut World,
        queues: &NetEventQueues,
        owned: EntityId,
        current_tick: u32,
        dt: f32,
    ) -> Result<(), SimError> {
        while let Some(info) = queues.drop_infos.pop() {
            self.handle_drop_info(info);
        }

        let map = *world.map();
        let Some(entity) = world.get_mut(owned) else {
            return Ok(());
        };

        entity.previous_position = entity.position;
        let predicted_position = entity.position;

        if let Some((server_tick, state)) = latest_owned_state(queues, owned) {
            if server_tick >= current_tick {
                return Err(SimError::ServerAheadOfClient {
                    server_tick,
                    client_tick: current_tick,
                });
            }

            // Snap to the authoritative state, then replay our inputs over
            // the ticks the server hadn't seen yet.
            entity.position = state.position;
            entity.velocity = state.velocity;

            for tick in (server_tick + 1)..current_tick {
                let ticks_ago = current_tick - tick;
                let inputs = self.history.get(ticks_ago).copied().ok_or(
                    SimError::MissingInputHistory {
                        needed: ticks_ago,
                        available: self.history.capacity(),
                    },
                )?;

                movement::move_entity(
                    &mut entity.position,
                    &mut entity.velocity,
                    &inputs,
                    &map,
                    dt,
                );
            }

            if entity.position != predicted_position {
                log::info!(
                    "prediction mismatched after replay from tick {server_tick}: \
                     ({:.4}, {:.4}) -> ({:.4}, {:.4})",
                    predicted_position.x,
                    predicted_position.y,
                    entity.position.x,
                    entity.position.y
                );
            }
        }

        // Advance with the live input to produce this tick's displayed
        // position. History index 0 holds exactly what record_input saw.
        let live_inputs = *self.history.get(0).unwrap_or(&InputStateVec::default());
        movement::move_entity(
            &mut entity.position,
            &mut entity.velocity,
            &live_inputs,
            &map,
            dt,
        );

        Ok(())
    }

    fn handle_drop_info(&self, info: MessageDropInfo) {
        // The server already flagged itself to send our authoritative state;
        // the next update corrects whatever we mispredicted off the dropped
        // input.
        log::warn!(
            "server dropped our input for tick {}; awaiting authoritative correction",
            info.tick
        );
    }
}

/// Drains the player-update queue and returns the newest authoritative
/// state for the owned entity, if any update carried one.
fn latest_owned_state(queues: &NetEventQueues, owned: EntityId) -> Option<(u32, EntityState)> {
    let mut latest: Option<(u32, EntityState)> = None;

    while let Some(update) = queues.player_updates.pop() {
        if let Some(state) = owned_state(&update, owned) {
            match &latest {
                Some((tick, _)) if *tick >= update.tick => {}
                _ => latest = Some((update.tick, state.clone())),
            }
        }
    }

    latest
}

fn owned_state(update: &MovementUpdate, owned: EntityId) -> Option<&EntityState> {
    update.entities.iter().find(|state| state.entity == owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::sync::Arc;

    use acre::sim::input::{Input, InputState};
    use acre::sim::world::{EntityKind, MapExtent};

    const DT: f32 = 1.0 / 30.0;

    fn world_with_player() -> (World, EntityId) {
        let mut world = World::new(MapExtent::new(64, 64), Vec3::new(32.0, 32.0, 0.0));
        let id = world.spawn(EntityKind::Player, Vec3::new(32.0, 32.0, 0.0));
        (world, id)
    }

    fn push_update(queues: &NetEventQueues, tick: u32, state: EntityState) {
        let mut update = MovementUpdate::new(tick);
        update.entities.push(state);
        queues.player_updates.push(Arc::new(update));
    }

    #[test]
    fn history_is_a_bounded_ring() {
        let mut history = InputHistory::new(3);
        for input in [Input::Up, Input::Down, Input::Left, Input::Right] {
            history.record(InputStateVec::pressed(input));
        }

        // Most recent first; the oldest entry fell off.
        assert!(history.get(0).unwrap().is_pressed(Input::Right));
        assert!(history.get(1).unwrap().is_pressed(Input::Left));
        assert!(history.get(2).unwrap().is_pressed(Input::Down));
        assert!(history.get(3).is_none());
    }

    #[test]
    fn advances_with_live_input_when_no_update_arrived() {
        let (mut world, owned) = world_with_player();
        let queues = NetEventQueues::default();
        let mut system = PlayerMovementSystem::new(20);

        system.record_input(InputStateVec::pressed(Input::Up));
        system
            .process(&mut world, &queues, owned, 10, DT)
            .unwrap();

        let entity = world.get(owned).unwrap();
        assert!(entity.position.y < 32.0);
        assert_eq!(entity.previous_position.y, 32.0);
    }

    #[test]
    fn replay_reconverges_on_the_predicted_position() {
        // The client predicted ticks 106..=110 with Up held. The server then
        // reports tick 105 exactly where prediction started; replaying the
        // same inputs must land exactly on the predicted position.
        let (mut world, owned) = world_with_player();
        let queues = NetEventQueues::default();
        let mut system = PlayerMovementSystem::new(20);

        let inputs = InputStateVec::pressed(Input::Up);
        let mut expected_position = Vec3::new(32.0, 32.0, 0.0);
        let mut expected_velocity = Vec3::ZERO;
        let map = MapExtent::new(64, 64);

        // Predict ticks 106..=110 locally.
        for tick in 106..=110u32 {
            system.record_input(inputs);
            system.process(&mut world, &queues, owned, tick, DT).unwrap();

            movement::move_entity(
                &mut expected_position,
                &mut expected_velocity,
                &inputs,
                &map,
                DT,
            );
        }
        assert_eq!(world.get(owned).unwrap().position, expected_position);

        // Authoritative state for tick 105: where we started, at rest.
        push_update(
            &queues,
            105,
            EntityState {
                entity: owned,
                position: Vec3::new(32.0, 32.0, 0.0),
                velocity: Vec3::ZERO,
                inputs,
                bounds: None,
            },
        );

        // Tick 111: snap to tick 105, replay 106..=110 from history, then
        // advance one live step.
        system.record_input(inputs);
        system.process(&mut world, &queues, owned, 111, DT).unwrap();

        movement::move_entity(
            &mut expected_position,
            &mut expected_velocity,
            &inputs,
            &map,
            DT,
        );
        assert_eq!(world.get(owned).unwrap().position, expected_position);
    }

    #[test]
    fn server_correction_moves_the_replayed_position() {
        let (mut world, owned) = world_with_player();
        let queues = NetEventQueues::default();
        let mut system = PlayerMovementSystem::new(20);

        // Predict two idle ticks, then get told we were somewhere else.
        for tick in 50..52u32 {
            system.record_input(InputStateVec::default());
            system.process(&mut world, &queues, owned, tick, DT).unwrap();
        }

        let corrected = Vec3::new(20.0, 20.0, 0.0);
        push_update(
            &queues,
            50,
            EntityState {
                entity: owned,
                position: corrected,
                velocity: Vec3::ZERO,
                inputs: InputStateVec::default(),
                bounds: None,
            },
        );

        system.record_input(InputStateVec::default());
        system.process(&mut world, &queues, owned, 52, DT).unwrap();

        // Idle inputs: the replay keeps us exactly at the server position.
        assert_eq!(world.get(owned).unwrap().position, corrected);
    }

    #[test]
    fn newest_update_wins_when_several_arrive() {
        let (mut world, owned) = world_with_player();
        let queues = NetEventQueues::default();
        let mut system = PlayerMovementSystem::new(20);

        for tick in 30..33u32 {
            system.record_input(InputStateVec::default());
            system.process(&mut world, &queues, owned, tick, DT).unwrap();
        }

        let older = Vec3::new(1.0, 1.0, 0.0);
        let newer = Vec3::new(9.0, 9.0, 0.0);
        let idle = InputStateVec::default();
        push_update(&queues, 30, EntityState {
            entity: owned,
            position: older,
            velocity: Vec3::ZERO,
            inputs: idle,
            bounds: None,
        });
        push_update(&queues, 32, EntityState {
            entity: owned,
            position: newer,
            velocity: Vec3::ZERO,
            inputs: idle,
            bounds: None,
        });

        system.record_input(idle);
        system.process(&mut world, &queues, owned, 33, DT).unwrap();

        assert_eq!(world.get(owned).unwrap().position, newer);
    }

    #[test]
    fn missing_history_is_fatal() {
        let (mut world, owned) = world_with_player();
        let queues = NetEventQueues::default();
        // Far too small for the replay span below.
        let mut system = PlayerMovementSystem::new(2);

        for tick in 100..110u32 {
            system.record_input(InputStateVec::default());
            system.process(&mut world, &queues, owned, tick, DT).unwrap();
        }

        push_update(
            &queues,
            100,
            EntityState {
                entity: owned,
                position: Vec3::ZERO,
                velocity: Vec3::ZERO,
                inputs: InputStateVec::default(),
                bounds: None,
            },
        );

        system.record_input(InputStateVec::default());
        let result = system.process(&mut world, &queues, owned, 110, DT);
        assert!(matches!(result, Err(SimError::MissingInputHistory { .. })));
    }

    #[test]
    fn server_from_the_future_is_fatal() {
        let (mut world, owned) = world_with_player();
        let queues = NetEventQueues::default();
        let mut system = PlayerMovementSystem::new(20);

        push_update(
            &queues,
            200,
            EntityState {
                entity: owned,
                position: Vec3::ZERO,
                velocity: Vec3::ZERO,
                inputs: InputStateVec::default(),
                bounds: None,
            },
        );

        system.record_input(InputStateVec::default());
        let result = system.process(&mut world, &queues, owned, 150, DT);
        assert!(matches!(result, Err(SimError::ServerAheadOfClient { .. })));
    }

    #[test]
    fn conflicting_inputs_resolve_identically_to_the_server() {
        // Both Up and Down held: the favoring rule must match the server's,
        // or every replay would drift.
        let mut inputs = InputStateVec::default();
        inputs.set(Input::Up, InputState::Pressed);
        inputs.set(Input::Down, InputState::Pressed);

        let mut velocity = Vec3::ZERO;
        movement::update_velocity(&mut velocity, &inputs);
        assert!(velocity.y < 0.0);
    }
}
