pub mod input;
pub mod movement;
pub mod timestep;
pub mod world;
