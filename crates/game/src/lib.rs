pub mod config;
pub mod net;
pub mod sim;

pub use config::SharedConfig;
pub use net::events::EventQueue;
pub use net::messages::{
    Aabb, ClientInputs, ConnectionRequest, ConnectionResponse, EntityState, ExplicitConfirmation,
    Heartbeat, Message, MessageDropInfo, MessageType, MovementUpdate,
};
pub use net::peer::{Peer, ReceiveResult, SendResult};
pub use net::sorter::{PushResult, ReceiveGuard, SORTER_BUFFER_SIZE, TickSorter, Validity};
pub use net::sync::{AdjustmentData, SyncConfig, TickDiffHistory, calc_adjustment};
pub use net::wire::{
    CLIENT_HEADER_SIZE, MESSAGE_HEADER_SIZE, SERVER_HEADER_SIZE, ServerHeader, WireError,
};
pub use sim::input::{Input, InputState, InputStateVec};
pub use sim::movement::MOVEMENT_VELOCITY;
pub use sim::timestep::FixedTimestep;
pub use sim::world::{Entity, EntityId, EntityKind, MapExtent, World};
