use crate::error::Result;

/// The update rule applied by the root solver against the combined gradient.
pub trait Optimizer: Send {
    /// Updates the flat parameter buffer using the flat gradient buffer.
    ///
    /// # Arguments
    /// * `grad` - The combined gradient of every replica.
    /// * `params` - The parameters to update in place.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the buffers differ in length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        (**self).update_params(grad, params)
    }
}
