pub mod archive;
pub mod collect;
pub mod config;
pub mod device;
pub mod error;
pub mod heatpump;
pub mod live;
pub mod mqtt;
pub mod nabto;
pub mod power;
pub mod registry;
pub mod status;
pub mod timescale;

pub use config::Config;
pub use error::{AppError, Result};
