pub mod config;
pub mod net;
pub mod sim;

pub use config::ClientConfig;
pub use net::{ClientNetwork, ConnectionError, NetEventQueues, NpcUpdate};
pub use sim::{ConnectionState, SimError, Simulation};
