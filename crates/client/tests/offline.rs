use std::sync::Arc;

use acre::sim::input::{Input, InputStateVec};
use acre_client::config::ClientConfig;
use acre_client::net::ClientNetwork;
use acre_client::sim::{ConnectionState, Simulation};

const STEP: f32 = 1.0 / 30.0;

fn offline_simulation() -> Simulation {
    let config = ClientConfig {
        run_offline: true,
        ..Default::default()
    };
    let network = Arc::new(ClientNetwork::new(config.clone()));
    Simulation::new(network, config)
}

#[test]
fn offline_mode_mocks_a_session_without_a_server() {
    let mut simulation = offline_simulation();
    simulation.request_connect();
    simulation.update(STEP).unwrap();

    assert_eq!(simulation.state(), ConnectionState::Connected);
    assert!(simulation.player_entity().is_some());
    assert!(simulation.current_tick() > 0);
}

#[test]
fn offline_player_moves_under_input() {
    let mut simulation = offline_simulation();
    simulation.request_connect();
    simulation.update(STEP).unwrap();

    let start = simulation.player_position().unwrap();

    simulation.set_inputs(InputStateVec::pressed(Input::Up));
    for _ in 0..30 {
        simulation.update(STEP).unwrap();
    }

    let end = simulation.player_position().unwrap();
    assert!(end.y < start.y, "player should have moved up");
    assert_eq!(end.x, start.x);

    // Releasing stops the avatar.
    simulation.set_inputs(InputStateVec::default());
    simulation.update(STEP).unwrap();
    let rest = simulation.player_position().unwrap();
    simulation.update(STEP).unwrap();
    assert_eq!(simulation.player_position().unwrap(), rest);
}
