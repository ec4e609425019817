use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use acre_server::config::ServerConfig;
use acre_server::events::ServerEvent;
use acre_server::net::{ClientHandler, ServerNetwork};
use acre_server::simulation::Simulation;

#[derive(Parser)]
#[command(name = "acre-server")]
#[command(about = "Acre game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 41825)]
    port: u16,

    #[arg(short, long, default_value_t = 100)]
    max_clients: usize,

    #[arg(long, default_value_t = 24.0, help = "Area-of-interest radius in world units")]
    aoi_radius: f32,

    #[arg(long, default_value_t = 64, help = "Map width in tiles")]
    map_width: u32,

    #[arg(long, default_value_t = 64, help = "Map height in tiles")]
    map_height: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        max_clients: args.max_clients,
        aoi_radius: args.aoi_radius,
        map: acre::MapExtent::new(args.map_width, args.map_height),
        spawn_point: glam::Vec3::new(args.map_width as f32 / 2.0, args.map_height as f32 / 2.0, 0.0),
        ..Default::default()
    };

    let bind_address = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&bind_address)?;
    log::info!("server listening on {}", listener.local_addr()?);

    let network = Arc::new(ServerNetwork::new(config));
    let _handler = ClientHandler::spawn(Arc::clone(&network), listener)?;
    let mut simulation = Simulation::new(Arc::clone(&network));

    let mut last_frame = Instant::now();
    loop {
        let now = Instant::now();
        let delta = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        simulation.update(delta);

        for event in simulation.drain_events() {
            match event {
                ServerEvent::ClientConnected {
                    net_id,
                    entity,
                    name,
                } => {
                    log::info!(
                        "client {net_id} joined as entity {entity} ({})",
                        name.as_deref().unwrap_or("unnamed")
                    );
                }
                ServerEvent::ClientDisconnected { net_id, entity } => {
                    log::info!("client {net_id} left, entity {entity} removed");
                }
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
