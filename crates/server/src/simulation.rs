//! The authoritative simulation: consumes connection events and sorted
//! inputs, advances movement, and feeds the replication filter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use acre::net::messages::{
    ConnectionResponse, EntityState, ExplicitConfirmation, MovementUpdate,
};
use acre::net::stats;
use acre::sim::movement;
use acre::sim::timestep::FixedTimestep;
use acre::sim::world::{EntityId, EntityKind, World};

use crate::events::ServerEvent;
use crate::net::ServerNetwork;

/// Sim-side state for one connected client. References its entity by id;
/// the entity itself lives in the world.
struct ClientSimData {
    entity: EntityId,
    /// Set when an input from this client was dropped. The next update we
    /// send includes the client's own authoritative state so it can correct
    /// its prediction.
    message_was_dropped: bool,
}

pub struct Simulation {
    network: Arc<ServerNetwork>,
    world: World,
    clients: HashMap<u32, ClientSimData>,
    timestep: FixedTimestep,
    send_accumulator: f32,
    ticks_since_stats_log: u32,
    events: Vec<ServerEvent>,
}

impl Simulation {
    pub fn new(network: Arc<ServerNetwork>) -> Self {
        let config = network.config();
        let world = World::new(config.map, config.spawn_point);
        let timestep = FixedTimestep::new(config.shared.sim_tick_rate);

        Self {
            network,
            world,
            clients: HashMap::new(),
            timestep,
            send_accumulator: 0.0,
            ticks_since_stats_log: 0,
            events: Vec::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn current_tick(&self) -> u32 {
        self.network.current_tick()
    }

    /// Lifecycle events accumulated since the last call, for the main loop
    /// to log.
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Advances the simulation by however many fixed steps fit in `delta`.
    pub fn update(&mut self, delta: f32) {
        self.timestep.accumulate(delta);

        while self.timestep.consume_tick() {
            let started = Instant::now();
            self.tick_once();

            if started.elapsed().as_secs_f32() > self.timestep.dt() {
                log::warn!(
                    "tick {} took longer than one sim step",
                    self.network.current_tick()
                );
            }
        }
    }

    fn tick_once(&mut self) {
        self.process_connect_events();
        self.process_connect_requests();
        self.process_disconnect_events();
        self.apply_client_inputs();
        self.flag_dropped_inputs();
        self.move_entities();
        self.send_client_updates();
        self.world.clear_dirty();

        self.network.advance_tick();

        // Batches go out at the network tick cadence, not every sim tick.
        self.send_accumulator += self.timestep.dt();
        let network_step = self.network.config().shared.network_timestep_s();
        while self.send_accumulator >= network_step {
            self.network.flush_batches();
            self.send_accumulator -= network_step;
        }

        self.ticks_since_stats_log += 1;
        if self.ticks_since_stats_log == stats::TICKS_TILL_STATS_DUMP {
            stats::log_stats();
            self.ticks_since_stats_log = 0;
        }
    }

    fn process_connect_events(&mut self) {
        while let Some(net_id) = self.network.connect_events().pop() {
            log::debug!("client {net_id} connected, awaiting its connection request");
        }
    }

    /// Builds an entity for each client whose connection request arrived and
    /// answers with everything it needs to start simulating.
    fn process_connect_requests(&mut self) {
        while let Some((net_id, request)) = self.network.connect_requests().pop() {
            if self.clients.contains_key(&net_id) {
                log::warn!("client {net_id} sent a second connection request, ignoring");
                continue;
            }

            let spawn = self.world.spawn_point();
            let entity = self.world.spawn(EntityKind::Player, spawn);
            self.clients.insert(
                net_id,
                ClientSimData {
                    entity,
                    message_was_dropped: false,
                },
            );

            let response = ConnectionResponse {
                entity,
                tick: self.network.current_tick(),
                spawn,
                map_width: self.world.map().width,
                map_height: self.world.map().height,
            };
            if let Err(error) = self.network.send(net_id, &response) {
                log::error!("failed to queue a connection response for {net_id}: {error}");
            }

            log::info!(
                "constructed entity {entity} for client {net_id} at ({:.1}, {:.1})",
                spawn.x,
                spawn.y
            );
            self.events.push(ServerEvent::ClientConnected {
                net_id,
                entity,
                name: request.name,
            });
        }
    }

    fn process_disconnect_events(&mut self) {
        while let Some(net_id) = self.network.disconnect_events().pop() {
            // Clients that never sent a connection request have no entity.
            let Some(data) = self.clients.remove(&net_id) else {
                continue;
            };

            self.world.despawn(data.entity);
            log::info!("erased entity {} for disconnected client {net_id}", data.entity);
            self.events.push(ServerEvent::ClientDisconnected {
                net_id,
                entity: data.entity,
            });
        }
    }

    /// Drains the inbox queue for the current tick and applies each input
    /// to its client's entity. Holding the receive guard blocks producers,
    /// so this drains everything in one pass.
    fn apply_client_inputs(&mut self) {
        let current_tick = self.network.current_tick();
        let mut guard = self.network.start_receive_inputs(current_tick);

        while let Some(input) = guard.pop() {
            let Some(data) = self.clients.get(&input.net_id) else {
                continue;
            };
            let Some(entity) = self.world.get_mut(data.entity) else {
                continue;
            };

            entity.inputs = input.inputs;
            entity.dirty = true;
        }
    }

    fn flag_dropped_inputs(&mut self) {
        while let Some(net_id) = self.network.drop_events().pop() {
            if let Some(data) = self.clients.get_mut(&net_id) {
                data.message_was_dropped = true;
            }
        }
    }

    fn move_entities(&mut self) {
        let map = *self.world.map();
        let dt = self.timestep.dt();

        for entity in self.world.entities_mut() {
            entity.previous_position = entity.position;
            let inputs = entity.inputs;
            movement::move_entity(&mut entity.position, &mut entity.velocity, &inputs, &map, dt);
        }
    }

    /// The replication filter: decides, per client, which of this tick's
    /// dirty entities it hears about.
    fn send_client_updates(&mut self) {
        let current_tick = self.network.current_tick();
        let aoi_radius_squared =
            self.network.config().aoi_radius * self.network.config().aoi_radius;

        let dirty_states: Vec<EntityState> = self
            .world
            .dirty_ids()
            .into_iter()
            .filter_map(|id| self.world.get(id))
            .map(snapshot)
            .collect();

        for (net_id, data) in &mut self.clients {
            let Some(client_entity) = self.world.get(data.entity) else {
                continue;
            };
            let aoi_center = client_entity.position;

            let mut update = MovementUpdate::new(current_tick);
            for state in &dirty_states {
                if state.position.distance_squared(aoi_center) <= aoi_radius_squared {
                    update.entities.push(state.clone());
                }
            }

            // A client that mispredicted needs its own authoritative state
            // even if it wasn't dirty.
            if data.message_was_dropped {
                if !update.entities.iter().any(|state| state.entity == data.entity) {
                    update.entities.push(snapshot(client_entity));
                }
                data.message_was_dropped = false;
            }

            let result = if update.entities.is_empty() {
                // Nothing to say, but the client's replication buffer still
                // needs to advance past this tick.
                self.network.send(
                    *net_id,
                    &ExplicitConfirmation {
                        confirmed_tick_count: 1,
                    },
                )
            } else {
                self.network.send(*net_id, &update)
            };

            if let Err(error) = result {
                log::error!("failed to queue an update for client {net_id}: {error}");
            }
        }
    }
}

fn snapshot(entity: &acre::sim::world::Entity) -> EntityState {
    EntityState {
        entity: entity.id,
        position: entity.position,
        velocity: entity.velocity,
        inputs: entity.inputs,
        bounds: Some(entity.bounds()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    use acre::sim::input::{Input, InputStateVec};

    // The replication-filter predicate, exercised through snapshots.
    #[test]
    fn aoi_check_uses_squared_distance() {
        let radius: f32 = 24.0;
        let center = Vec3::new(32.0, 32.0, 0.0);

        let near = Vec3::new(32.0, 10.0, 0.0);
        let far = Vec3::new(32.0, 60.0, 0.0);

        assert!(near.distance_squared(center) <= radius * radius);
        assert!(far.distance_squared(center) > radius * radius);
    }

    #[test]
    fn snapshot_carries_entity_state() {
        let mut world = World::new(Default::default(), Vec3::ZERO);
        let id = world.spawn(EntityKind::Player, Vec3::new(5.0, 5.0, 0.0));
        let entity = world.get_mut(id).unwrap();
        entity.inputs = InputStateVec::pressed(Input::Up);
        entity.velocity = Vec3::new(0.0, -4.5, 0.0);

        let state = snapshot(world.get(id).unwrap());
        assert_eq!(state.entity, id);
        assert_eq!(state.position, Vec3::new(5.0, 5.0, 0.0));
        assert_eq!(state.velocity, Vec3::new(0.0, -4.5, 0.0));
        assert!(state.inputs.is_pressed(Input::Up));
        assert!(state.bounds.is_some());
    }
}
