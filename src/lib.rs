pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod initialization;
pub mod models;
pub mod optimization;
pub mod params;
pub mod solver;
pub mod sync;
pub mod topology;

pub use error::{Result, SyncErr};
pub use sync::{P2pSync, RunReport, SyncOptions};
