/// Tunables that both sides of a connection must agree on.
///
/// The fixed timestep drives all tick math on the wire, and the batch caps
/// bound every frame the codec will accept, so a client and server running
/// with different values here will never stay in sync.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    /// Simulation ticks per second. The fixed step is `1 / sim_tick_rate`.
    pub sim_tick_rate: u32,
    /// Network ticks per second. Server batches and client heartbeats are
    /// emitted at this cadence.
    pub network_tick_rate: u32,
    /// Upper bound on a single batch payload in bytes. Must fit in 15 bits,
    /// since the high bit of the wire size field carries the compression
    /// flag.
    pub max_batch_size: usize,
    /// Batch payloads larger than this are compressed before framing.
    pub batch_compression_threshold: usize,
    /// Upper bound on a single serialized message body in bytes.
    pub max_message_size: usize,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            sim_tick_rate: 30,
            network_tick_rate: 20,
            max_batch_size: 16_384,
            batch_compression_threshold: 1_024,
            max_message_size: 4_000,
        }
    }
}

impl SharedConfig {
    pub fn sim_timestep_s(&self) -> f32 {
        1.0 / self.sim_tick_rate as f32
    }

    pub fn network_timestep_s(&self) -> f32 {
        1.0 / self.network_tick_rate as f32
    }

    /// How long a peer may stay silent before it's declared disconnected.
    pub fn receive_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f32(self.network_timestep_s() * 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_fits_size_field() {
        let config = SharedConfig::default();
        assert!(config.max_batch_size <= 0x7FFF);
        assert!(config.max_message_size <= u16::MAX as usize);
    }
}
