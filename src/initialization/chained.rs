use super::ParamGen;

/// Delegates to a sequence of generators, moving to the next one as each runs out.
///
/// Useful to initialize each tensor of a model with its own distribution.
pub struct ChainedParamGen {
    param_gens: Vec<Box<dyn ParamGen>>,
    curr: usize,
}

impl ChainedParamGen {
    /// Creates a new `ChainedParamGen`.
    ///
    /// # Arguments
    /// * `param_gens` - The generators, in the order they are drained.
    pub fn new(param_gens: Vec<Box<dyn ParamGen>>) -> Self {
        Self {
            param_gens,
            curr: 0,
        }
    }
}

impl ParamGen for ChainedParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        let mut sample = Vec::with_capacity(n);

        while sample.len() < n && self.curr < self.param_gens.len() {
            match self.param_gens[self.curr].sample(n - sample.len()) {
                Some(part) if !part.is_empty() => sample.extend(part),
                _ => self.curr += 1,
            }
        }

        if sample.is_empty() {
            return None;
        }

        Some(sample)
    }
}
