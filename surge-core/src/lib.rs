mod config;
mod constants;
mod error;
mod sample;
mod stage;
mod stats;
mod threshold;

pub mod duration;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use sample::*;
pub use stage::*;
pub use stats::*;
pub use threshold::*;
