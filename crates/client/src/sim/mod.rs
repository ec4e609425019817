pub mod npc;
pub mod player;
pub mod simulation;

use thiserror::Error;

/// Fatal simulation-side failures. None of these are recoverable in place:
/// they indicate either a configuration problem or a logic bug, and the
/// caller is expected to tear the session down.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(
        "input history too short: needed {needed} ticks of history, only {available} are kept"
    )]
    MissingInputHistory { needed: u32, available: usize },
    #[error(
        "received authoritative state for tick {server_tick} at client tick {client_tick}; \
         the server is in the future, inputs can't be replayed"
    )]
    ServerAheadOfClient { server_tick: u32, client_tick: u32 },
    #[error("npc replication out of order: expected tick {expected}, buffer held {actual}")]
    NpcUpdateOutOfOrder { expected: u32, actual: u32 },
    #[error("replication offset adjusted to {offset}; it must stay in the past")]
    ReplicationOffsetInvalid { offset: i32 },
}

pub use simulation::{ConnectionState, Simulation};
