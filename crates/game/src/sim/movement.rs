use glam::Vec3;

use super::input::{Input, InputStateVec};
use super::world::MapExtent;

/// Movement speed in world units per second while an axis is held.
pub const MOVEMENT_VELOCITY: f32 = 4.5;

/// Derives this tick's velocity from the held inputs.
///
/// Up/down favors up, left/right favors right, matching the authoritative
/// side; both ends must resolve conflicting inputs identically or the
/// prediction replay diverges.
pub fn update_velocity(velocity: &mut Vec3, inputs: &InputStateVec) {
    if inputs.is_pressed(Input::Up) {
        velocity.y = -MOVEMENT_VELOCITY;
    } else if inputs.is_pressed(Input::Down) {
        velocity.y = MOVEMENT_VELOCITY;
    } else {
        velocity.y = 0.0;
    }

    if inputs.is_pressed(Input::Right) {
        velocity.x = MOVEMENT_VELOCITY;
    } else if inputs.is_pressed(Input::Left) {
        velocity.x = -MOVEMENT_VELOCITY;
    } else {
        velocity.x = 0.0;
    }
}

/// Integrates the velocity over one step, clamped to the map extent.
pub fn update_position(position: &mut Vec3, velocity: Vec3, map: &MapExtent, dt: f32) {
    position.x = (position.x + velocity.x * dt).clamp(0.0, map.width_units());
    position.y = (position.y + velocity.y * dt).clamp(0.0, map.height_units());
}

/// One full movement step: velocity from inputs, then integration.
pub fn move_entity(
    position: &mut Vec3,
    velocity: &mut Vec3,
    inputs: &InputStateVec,
    map: &MapExtent,
    dt: f32,
) {
    update_velocity(velocity, inputs);
    update_position(position, *velocity, map, dt);
}
