use crate::error::Result;

/// Whether a solver applies its optimizer step this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// The gradient in the buffer is the combined one, apply it.
    Apply,
    /// The parameters were already replaced by someone else's update.
    Skip,
}

/// The hooks a solver invokes at the two synchronization points of an iteration.
pub trait SolverCallback: Send + Sync {
    /// Called once the local gradient is computed, right before the optimizer step.
    fn before_iteration(&self) -> Result<Update>;

    /// Called right after the parameters of the iteration are final.
    fn finish_iteration(&self) -> Result<()>;
}
