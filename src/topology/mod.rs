mod builder;
mod pair;

pub use builder::compute;
pub use pair::{DevicePair, Topology};
