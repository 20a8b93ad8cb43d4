use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use super::{ParamGen, Result};

/// Samples parameters from a probability distribution.
///
/// The rng is shared so that several generators of a `ChainedParamGen` draw from a
/// single seeded stream.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
    remaining: usize,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    /// Creates a new `RandParamGen`.
    ///
    /// # Arguments
    /// * `rng` - The shared random number generator.
    /// * `distribution` - The distribution to sample from.
    /// * `limit` - How many values to generate before being exhausted.
    pub fn new(rng: Rc<RefCell<R>>, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Uniform distribution over `[low, high)`.
    ///
    /// # Returns
    /// An error if `low >= high`.
    pub fn uniform(rng: Rc<RefCell<R>>, limit: usize, low: f32, high: f32) -> Result<Self> {
        Ok(Self::new(rng, Uniform::new(low, high)?, limit))
    }

    /// Uniform distribution over `[low, high]`.
    ///
    /// # Returns
    /// An error if `low > high`.
    pub fn uniform_inclusive(
        rng: Rc<RefCell<R>>,
        limit: usize,
        low: f32,
        high: f32,
    ) -> Result<Self> {
        Ok(Self::new(rng, Uniform::new_inclusive(low, high)?, limit))
    }

    /// Xavier (Glorot) uniform initialization.
    pub fn xavier_uniform(
        rng: Rc<RefCell<R>>,
        limit: usize,
        fan_in: usize,
        fan_out: usize,
    ) -> Result<Self> {
        let range = (6. / (fan_in + fan_out) as f32).sqrt();
        Self::uniform(rng, limit, -range, range)
    }

    /// LeCun uniform initialization.
    pub fn lecun_uniform(rng: Rc<RefCell<R>>, limit: usize, fan_in: usize) -> Result<Self> {
        let range = (3. / fan_in as f32).sqrt();
        Self::uniform(rng, limit, -range, range)
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// Normal distribution.
    ///
    /// # Returns
    /// An error if `std_dev` isn't finite.
    pub fn normal(rng: Rc<RefCell<R>>, limit: usize, mean: f32, std_dev: f32) -> Result<Self> {
        Ok(Self::new(rng, Normal::new(mean, std_dev)?, limit))
    }

    /// Kaiming (He) normal initialization.
    pub fn kaiming(rng: Rc<RefCell<R>>, limit: usize, fan_in: usize) -> Result<Self> {
        let std_dev = (2. / fan_in as f32).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }

    /// Xavier (Glorot) normal initialization.
    pub fn xavier(
        rng: Rc<RefCell<R>>,
        limit: usize,
        fan_in: usize,
        fan_out: usize,
    ) -> Result<Self> {
        let std_dev = (2. / (fan_in + fan_out) as f32).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }

    /// LeCun normal initialization.
    pub fn lecun(rng: Rc<RefCell<R>>, limit: usize, fan_in: usize) -> Result<Self> {
        let std_dev = (1. / fan_in as f32).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        let n = n.min(self.remaining);
        self.remaining -= n;

        let mut rng = self.rng.borrow_mut();
        Some(
            (0..n)
                .map(|_| self.distribution.sample(&mut *rng))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn seeded_rng(seed: u64) -> Rc<RefCell<StdRng>> {
        Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
    }

    #[test]
    fn respects_limit() {
        let mut param_gen = RandParamGen::normal(seeded_rng(42), 10, 0., 1.).unwrap();

        assert_eq!(param_gen.sample(7).unwrap().len(), 7);
        assert_eq!(param_gen.sample(7).unwrap().len(), 3);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn same_seed_same_values() {
        let mut a = RandParamGen::uniform(seeded_rng(7), 16, -1., 1.).unwrap();
        let mut b = RandParamGen::uniform(seeded_rng(7), 16, -1., 1.).unwrap();

        let sample = a.sample(16).unwrap();
        assert_eq!(sample, b.sample(16).unwrap());
        assert!(sample.iter().all(|x| (-1.0..1.0).contains(x)));
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(RandParamGen::uniform(seeded_rng(0), 1, 1., -1.).is_err());
        assert!(RandParamGen::normal(seeded_rng(0), 1, 0., f32::NAN).is_err());
    }
}
