use super::{Optimizer, check_sizes};
use crate::error::Result;

/// Plain gradient descent.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The step size.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;

        let lr = self.learning_rate;
        params.iter_mut().zip(grad).for_each(|(p, g)| *p -= lr * g);
        Ok(())
    }
}
