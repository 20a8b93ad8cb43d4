use super::ParamGen;

/// Generates the same value up to a limit.
pub struct ConstParamGen {
    value: f32,
    remaining: usize,
}

impl ConstParamGen {
    /// Creates a new `ConstParamGen`.
    ///
    /// # Arguments
    /// * `value` - The value to generate.
    /// * `limit` - How many values to generate before being exhausted.
    pub fn new(value: f32, limit: usize) -> Self {
        Self {
            value,
            remaining: limit,
        }
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        let n = n.min(self.remaining);
        self.remaining -= n;
        Some(vec![self.value; n])
    }
}
