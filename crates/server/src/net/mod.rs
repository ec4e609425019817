pub mod client;
pub mod handler;
pub mod id_pool;
pub mod network;

pub use client::{Client, ClientReceive};
pub use handler::ClientHandler;
pub use id_pool::IdPool;
pub use network::{ClientMap, ServerNetwork, SortedInput};
