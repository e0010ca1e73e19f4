//! Domain layer - Cluster model and port definitions
//!
//! The model describes what a run provisions; the ports are the seams to the
//! external systems that do the work.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
