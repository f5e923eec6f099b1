pub mod classifier;
pub mod clip;
pub mod error;
pub mod geometry;
pub mod lock;
pub mod movement;
pub mod settings;
pub mod track_state;
pub mod types;
