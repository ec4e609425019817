//! The client simulation loop: fixed-step ticking, the server connection
//! state machine, and the per-tick system order.

use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;

use acre::net::messages::ClientInputs;
use acre::net::stats;
use acre::sim::input::InputStateVec;
use acre::sim::timestep::FixedTimestep;
use acre::sim::world::{EntityId, EntityKind, MapExtent, World};

use super::SimError;
use super::npc::NpcMovementSystem;
use super::player::PlayerMovementSystem;
use crate::config::ClientConfig;
use crate::net::{ClientNetwork, ConnectionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Connection request sent; waiting for the server's response.
    AwaitingResponse,
    Connected,
}

pub struct Simulation {
    network: Arc<ClientNetwork>,
    config: ClientConfig,
    world: World,
    /// Aims a few ticks ahead of the server so our inputs arrive in time;
    /// the adjustment protocol keeps it there.
    current_tick: u32,
    state: ConnectionState,
    connect_requested: bool,
    attempt_started: Option<Instant>,
    player_entity: Option<EntityId>,
    player: PlayerMovementSystem,
    npc: NpcMovementSystem,
    /// What the frontend wants pressed this frame; becomes this tick's
    /// input at the next tick boundary.
    pending_inputs: InputStateVec,
    timestep: FixedTimestep,
    ticks_since_stats_log: u32,
}

impl Simulation {
    pub fn new(network: Arc<ClientNetwork>, config: ClientConfig) -> Self {
        let timestep = FixedTimestep::new(config.shared.sim_tick_rate);
        Self {
            world: World::new(MapExtent::default(), Vec3::ZERO),
            current_tick: 0,
            state: ConnectionState::Disconnected,
            connect_requested: false,
            attempt_started: None,
            player_entity: None,
            player: PlayerMovementSystem::new(config.input_history_length),
            npc: NpcMovementSystem::new(config.initial_replication_offset),
            pending_inputs: InputStateVec::default(),
            timestep,
            ticks_since_stats_log: 0,
            network,
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn player_entity(&self) -> Option<EntityId> {
        self.player_entity
    }

    pub fn player_position(&self) -> Option<Vec3> {
        self.player_entity
            .and_then(|id| self.world.get(id))
            .map(|entity| entity.position)
    }

    /// Kicks off a connection attempt at the next tick (or the offline
    /// mock, when configured to run without a server).
    pub fn request_connect(&mut self) {
        self.connect_requested = true;
    }

    /// Replaces the pending input state; takes effect at the next tick.
    pub fn set_inputs(&mut self, inputs: InputStateVec) {
        self.pending_inputs = inputs;
    }

    /// Advances the simulation by however many fixed steps fit in `delta`,
    /// honoring tick adjustments commanded by the server.
    pub fn update(&mut self, delta: f32) -> Result<(), SimError> {
        self.timestep.accumulate(delta);

        while self.timestep.consume_tick() {
            let adjustment = self.network.transfer_tick_adjustment();
            if adjustment != 0 {
                // The replication offset re-tunes off the same adjustment
                // stream.
                self.npc.apply_adjustment(adjustment)?;
            }

            if adjustment < 0 {
                // Freeze: consume the step without simulating, letting the
                // server catch up by one tick.
                log::info!("freezing for one tick (tick {})", self.current_tick);
                continue;
            }

            // 0 means run this tick; a positive adjustment means running
            // that many extra ticks this frame to catch up.
            for _ in 0..=adjustment as u32 {
                self.tick_once()?;
            }
        }

        Ok(())
    }

    fn tick_once(&mut self) -> Result<(), SimError> {
        let started = Instant::now();

        self.process_connection_events();

        // The tick counter stays at rest until the server has told us where
        // to aim it; heartbeats from an unaligned counter would read as
        // wildly out-of-range diffs.
        if self.state != ConnectionState::Connected {
            return Ok(());
        }

        self.process_player_input();

        if let Some(owned) = self.player_entity {
            self.player.process(
                &mut self.world,
                self.network.queues(),
                owned,
                self.current_tick,
                self.timestep.dt(),
            )?;

            if !self.config.run_offline {
                self.npc.process(
                    &mut self.world,
                    self.network.queues(),
                    owned,
                    self.current_tick,
                    self.timestep.dt(),
                )?;
            }
        }

        self.network.tick(self.current_tick, self.timestep.dt());
        self.current_tick += 1;

        self.ticks_since_stats_log += 1;
        if self.ticks_since_stats_log == stats::TICKS_TILL_STATS_DUMP {
            if !self.config.run_offline {
                stats::log_stats();
            }
            self.ticks_since_stats_log = 0;
        }

        if started.elapsed().as_secs_f32() > self.timestep.dt() {
            log::warn!("tick {} took longer than one sim step", self.current_tick);
        }

        Ok(())
    }

    /// The connection state machine. Terminal transitions reset the whole
    /// sim state; nothing survives a disconnect except the configuration.
    fn process_connection_events(&mut self) {
        match self.state {
            ConnectionState::Disconnected => {
                if !self.connect_requested {
                    return;
                }
                self.connect_requested = false;

                if self.config.run_offline {
                    self.init_offline_state();
                    return;
                }

                self.network.connect();
                self.state = ConnectionState::AwaitingResponse;
                self.attempt_started = Some(Instant::now());
            }
            ConnectionState::AwaitingResponse => {
                if let Some(response) = self.network.queues().connection_responses.pop() {
                    self.init_sim_state(response);
                } else if self
                    .attempt_started
                    .is_some_and(|started| started.elapsed() >= self.config.connect_response_timeout)
                {
                    log::warn!("timed out waiting for the server's connection response");
                    self.handle_connection_error(ConnectionError::Failed);
                }
            }
            ConnectionState::Connected => {}
        }

        if let Some(error) = self.network.queues().connection_errors.pop() {
            self.handle_connection_error(error);
        }
    }

    fn init_sim_state(&mut self, response: acre::net::messages::ConnectionResponse) {
        log::info!(
            "received connection response. entity: {}, tick: {}, pos: ({:.1}, {:.1})",
            response.entity,
            response.tick,
            response.spawn.x,
            response.spawn.y
        );

        self.world
            .set_map(MapExtent::new(response.map_width, response.map_height));

        // Aim our tick ahead of the server; it will adjust us after the
        // first few messages anyway.
        self.current_tick = response.tick + self.config.initial_tick_offset;

        self.world
            .spawn_with_id(response.entity, EntityKind::Player, response.spawn);
        self.player_entity = Some(response.entity);

        self.state = ConnectionState::Connected;
        self.attempt_started = None;
    }

    fn init_offline_state(&mut self) {
        log::info!("running offline, mocking up the local player");

        let spawn = Vec3::new(
            self.world.map().width_units() / 2.0,
            self.world.map().height_units() / 2.0,
            0.0,
        );
        let entity = self.world.spawn(EntityKind::Player, spawn);
        self.player_entity = Some(entity);
        self.current_tick = self.config.initial_tick_offset;
        self.state = ConnectionState::Connected;
    }

    fn handle_connection_error(&mut self, error: ConnectionError) {
        match error {
            ConnectionError::Failed => log::warn!("connection attempt failed"),
            ConnectionError::Disconnected => log::warn!("lost the server connection"),
        }

        self.network.disconnect();
        self.network.queues().clear_all();

        self.world.clear();
        self.player_entity = None;
        self.player.reset();
        self.npc.reset(self.config.initial_replication_offset);
        // Back to 0 so the network layer knows not to send heartbeats
        // until we're simulating again.
        self.current_tick = 0;
        self.state = ConnectionState::Disconnected;
        self.attempt_started = None;
    }

    /// Applies the pending input to the owned entity, records it into the
    /// replay history, and tells the server when it changed.
    fn process_player_input(&mut self) {
        let Some(owned) = self.player_entity else {
            return;
        };
        let Some(entity) = self.world.get_mut(owned) else {
            return;
        };

        let inputs = self.pending_inputs;
        if entity.inputs != inputs {
            entity.inputs = inputs;

            if !self.config.run_offline {
                let message = ClientInputs {
                    tick: self.current_tick,
                    inputs,
                };
                if let Err(error) = self.network.send_message(&message) {
                    log::error!("failed to send inputs: {error}");
                }
            }
        }

        self.player.record_input(inputs);
    }
}
