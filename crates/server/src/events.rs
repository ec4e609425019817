use acre::sim::world::EntityId;

/// Lifecycle events surfaced to the main loop for operator-facing logging.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        net_id: u32,
        entity: EntityId,
        name: Option<String>,
    },
    ClientDisconnected {
        net_id: u32,
        entity: EntityId,
    },
}
