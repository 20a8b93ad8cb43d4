use super::{Optimizer, check_sizes};
use crate::error::Result;

/// Adam with bias correction.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    m: Box<[f32]>,
    v: Box<[f32]>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters to keep moments for.
    /// * `learning_rate` - The step size.
    /// * `beta1`, `beta2`, `epsilon` - The usual Adam hyperparameters.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            m: vec![0.; len].into_boxed_slice(),
            v: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(&self.m, params)?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;
        let step_size = lr * (1. - self.beta2_t).sqrt() / (1. - self.beta1_t);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
            .for_each(|((p, g), (m, v))| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;
                *p -= step_size * *m / (v.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut optimizer = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [0., 0.];

        optimizer.update_params(&[3., -0.5], &mut params).unwrap();

        assert!((params[0] + 0.1).abs() < 1e-4);
        assert!((params[1] - 0.1).abs() < 1e-4);
    }
}
