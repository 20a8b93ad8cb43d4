/// Produces the initial values of the root replica's parameters.
pub trait ParamGen {
    /// Should sample at most `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// `None` once the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}
