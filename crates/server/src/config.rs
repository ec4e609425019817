use glam::Vec3;

use acre::net::sync::SyncConfig;
use acre::sim::world::MapExtent;
use acre::SharedConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub shared: SharedConfig,
    pub sync: SyncConfig,
    /// Hard cap on simultaneously connected clients.
    pub max_clients: usize,
    /// Radius of each client's area of interest, in world units.
    pub aoi_radius: f32,
    pub map: MapExtent,
    pub spawn_point: Vec3,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let map = MapExtent::default();
        Self {
            shared: SharedConfig::default(),
            sync: SyncConfig::default(),
            max_clients: 100,
            aoi_radius: 24.0,
            spawn_point: Vec3::new(map.width_units() / 2.0, map.height_units() / 2.0, 0.0),
            map,
        }
    }
}
