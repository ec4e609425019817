pub mod config;
pub mod events;
pub mod net;
pub mod simulation;

pub use config::ServerConfig;
pub use events::ServerEvent;
pub use net::{ClientHandler, ServerNetwork};
pub use simulation::Simulation;
