pub mod network;
pub mod processor;

pub use network::{ClientNetwork, NetError};
pub use processor::{ConnectionError, MessageProcessor, NetEventQueues, NpcUpdate};
