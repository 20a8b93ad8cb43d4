mod p2p;
mod peer;
mod queue;
mod task;

pub use p2p::{P2pSync, RunReport, SyncOptions};
pub use peer::{Handoff, PeerSync, Reduction};
pub use queue::BlockingQueue;
pub use task::{BackgroundTask, StopSignal};
