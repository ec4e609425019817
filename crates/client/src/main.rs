use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use acre::sim::input::{Input, InputStateVec};
use acre_client::config::ClientConfig;
use acre_client::net::ClientNetwork;
use acre_client::sim::{ConnectionState, Simulation};

#[derive(Parser)]
#[command(name = "acre-client")]
#[command(about = "Acre game client (headless demo walker)")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    #[arg(short, long, default_value_t = 41825)]
    port: u16,

    #[arg(short, long, help = "Player name sent with the connection request")]
    name: Option<String>,

    #[arg(long, help = "Mock the server and run the sim locally")]
    offline: bool,

    #[arg(long, default_value_t = 90, help = "Ticks between direction changes")]
    walk_period: u32,
}

/// Drives the avatar in a square: up, right, down, left.
fn scripted_inputs(tick: u32, walk_period: u32) -> InputStateVec {
    const DIRECTIONS: [Input; 4] = [Input::Up, Input::Right, Input::Down, Input::Left];
    let phase = (tick / walk_period.max(1)) as usize % DIRECTIONS.len();
    InputStateVec::pressed(DIRECTIONS[phase])
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ClientConfig {
        server_address: SocketAddr::new(args.server.parse()?, args.port),
        player_name: args.name,
        run_offline: args.offline,
        ..Default::default()
    };

    let network = Arc::new(ClientNetwork::new(config.clone()));
    let mut simulation = Simulation::new(Arc::clone(&network), config);
    simulation.request_connect();

    let mut attempt_seen = false;
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    loop {
        let now = Instant::now();
        let delta = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        simulation.set_inputs(scripted_inputs(simulation.current_tick(), args.walk_period));

        if let Err(error) = simulation.update(delta) {
            log::error!("simulation failed: {error}");
            network.disconnect();
            return Err(error.into());
        }

        match simulation.state() {
            ConnectionState::Connected | ConnectionState::AwaitingResponse => {
                attempt_seen = true;
            }
            // Disconnected before the first tick just means the connect
            // request hasn't been picked up yet.
            ConnectionState::Disconnected if attempt_seen => {
                log::info!("session ended");
                return Ok(());
            }
            ConnectionState::Disconnected => {}
        }

        if last_report.elapsed() >= Duration::from_secs(2) {
            last_report = Instant::now();
            if let Some(position) = simulation.player_position() {
                log::info!(
                    "tick {}: player at ({:.2}, {:.2})",
                    simulation.current_tick(),
                    position.x,
                    position.y
                );
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
