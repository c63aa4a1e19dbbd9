pub mod error;
pub mod grid;
pub mod textfile;

// Animation
pub mod animation;
pub mod animation_parser;

// Inputs
pub mod params;
pub mod target;
pub mod scene;

// Frame pipeline
pub mod energy;
pub mod raster;
pub mod gpu;
pub mod reduce;
pub mod phase;
pub mod demod;
pub mod resources;
pub mod stepper;

pub mod export;
pub mod cli;

pub use error::{Result, SimError};
