mod linear;

pub use linear::{LinearRegression, LinearReplicas};
