mod callback;
mod net;
mod solver;

pub use callback::{SolverCallback, Update};
pub use net::{Net, ReplicaFactory};
pub use solver::Solver;
