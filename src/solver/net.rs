use crate::{
    device::DeviceId,
    error::Result,
    optimization::Optimizer,
    params::{Tensors, TensorsMut},
};

/// The model graph of one replica.
///
/// The net never owns its parameters, it reads them from and writes its gradients into
/// the flat buffers of whatever `ParameterSet` its solver is bound to.
pub trait Net: Send {
    /// The element count of every learnable tensor, in traversal order.
    fn param_sizes(&self) -> Vec<usize>;

    /// Runs a forward and a backward pass over the next batch.
    ///
    /// # Arguments
    /// * `params` - The current parameters, per tensor.
    /// * `grads` - Where to write the local gradient, zeroed beforehand.
    ///
    /// # Returns
    /// The loss of the batch.
    fn forward_backward(&mut self, params: Tensors<'_>, grads: TensorsMut<'_>) -> Result<f32>;
}

/// Builds the replicas of a run, one per device.
///
/// Every replica is built through the same code path, which is what keeps their flat
/// buffer layouts identical.
pub trait ReplicaFactory: Sync {
    /// The element count of every learnable tensor of the model, in traversal order.
    fn param_sizes(&self) -> Vec<usize>;

    /// Builds the net of the replica living on `device`.
    fn net(&self, device: DeviceId) -> Result<Box<dyn Net>>;

    /// Builds the optimizer of a replica holding `size` parameters.
    fn optimizer(&self, size: usize) -> Box<dyn Optimizer>;
}
