use std::net::SocketAddr;
use std::time::Duration;

use acre::SharedConfig;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub shared: SharedConfig,
    pub server_address: SocketAddr,
    /// Shown to the server in our connection request.
    pub player_name: Option<String>,
    /// How far ahead of the server's tick we start. The server walks us to
    /// the right lead after the first few messages anyway.
    pub initial_tick_offset: u32,
    /// How far behind our own tick we replicate non-predicted state.
    /// Always negative; received data sits twice the tick lead in the past,
    /// so the default is minus twice `initial_tick_offset`.
    pub initial_replication_offset: i32,
    /// How many ticks of our own inputs we keep for reconciliation replay.
    /// Must comfortably exceed the largest tick lead we expect to run at.
    pub input_history_length: usize,
    /// How long we wait for the server's connection response before
    /// reporting the attempt as failed.
    pub connect_response_timeout: Duration,
    /// Mock the server and run the simulation locally, never touching the
    /// network.
    pub run_offline: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let initial_tick_offset = 5;
        Self {
            shared: SharedConfig::default(),
            server_address: SocketAddr::from(([127, 0, 0, 1], 41825)),
            player_name: None,
            initial_tick_offset,
            initial_replication_offset: -2 * initial_tick_offset as i32,
            input_history_length: 20,
            connect_response_timeout: Duration::from_secs(5),
            run_offline: false,
        }
    }
}
