use std::sync::Arc;

use super::{DeviceBuffer, ParamLayout, Tensors, TensorsMut};
use crate::{
    device::DeviceId,
    error::{Result, SyncErr},
    initialization::ParamGen,
};

/// All trainable parameters of one replica in a single contiguous buffer, plus a parallel
/// contiguous buffer for their gradients.
///
/// The two regions are independent so that a whole model can be synchronized with a
/// single bulk copy or a single bulk accumulation.
#[derive(Debug)]
pub struct ParameterSet {
    layout: Arc<ParamLayout>,
    params: DeviceBuffer,
    grads: DeviceBuffer,
}

impl ParameterSet {
    /// Allocates a zero-filled `ParameterSet` on the device bound to the calling thread.
    ///
    /// # Arguments
    /// * `layout` - The offset table of the model's tensors.
    ///
    /// # Returns
    /// The new set or `ResourceExhaustion` if either buffer can't be allocated.
    pub fn new(layout: Arc<ParamLayout>) -> Result<Self> {
        let size = layout.size();

        Ok(Self {
            params: DeviceBuffer::zeroed(size)?,
            grads: DeviceBuffer::zeroed(size)?,
            layout,
        })
    }

    /// Allocates a `ParameterSet` for a model with the given tensor sizes.
    ///
    /// # Arguments
    /// * `sizes` - The element count of each learnable tensor, in traversal order.
    pub fn from_sizes(sizes: &[usize]) -> Result<Self> {
        Self::new(Arc::new(ParamLayout::from_sizes(sizes)))
    }

    /// Fills the parameters from a generator.
    ///
    /// # Arguments
    /// * `param_gen` - The generator, it must yield at least `size` values.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the generator runs out early, yields an empty sample or
    /// yields more values than asked for.
    pub fn initialize(&self, param_gen: &mut dyn ParamGen) -> Result<()> {
        let mut params = self.params.lock();
        let mut filled = 0;

        while filled < params.len() {
            let wanted = params.len() - filled;

            let Some(sample) = param_gen.sample(wanted) else {
                break;
            };

            if sample.is_empty() {
                break;
            }

            if sample.len() > wanted {
                return Err(SyncErr::SizeMismatch {
                    what: "parameter initialization",
                    got: filled + sample.len(),
                    expected: params.len(),
                });
            }

            params[filled..filled + sample.len()].copy_from_slice(&sample);
            filled += sample.len();
        }

        if filled != params.len() {
            return Err(SyncErr::SizeMismatch {
                what: "parameter initialization",
                got: filled,
                expected: params.len(),
            });
        }

        Ok(())
    }

    /// The amount of parameters, and gradients, in the set.
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// The offset table shared by every replica of the model.
    pub fn layout(&self) -> &Arc<ParamLayout> {
        &self.layout
    }

    /// The device holding both buffers, `None` for the host.
    pub fn device(&self) -> Option<DeviceId> {
        self.params.device()
    }

    /// The flat parameter buffer.
    pub fn params(&self) -> &DeviceBuffer {
        &self.params
    }

    /// The flat gradient buffer.
    pub fn grads(&self) -> &DeviceBuffer {
        &self.grads
    }

    /// Runs `f` with per-tensor views of the parameters and the gradients.
    pub fn with_tensors<T, F>(&self, f: F) -> T
    where
        F: FnOnce(Tensors<'_>, TensorsMut<'_>) -> T,
    {
        let params = self.params.lock();
        let mut grads = self.grads.lock();

        f(
            Tensors::new(&self.layout, &params),
            TensorsMut::new(&self.layout, &mut grads),
        )
    }

    /// Runs `f` with the flat gradient buffer and the flat parameter buffer, the way an
    /// optimizer step needs them.
    pub fn with_update<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&[f32], &mut [f32]) -> T,
    {
        let mut params = self.params.lock();
        let grads = self.grads.lock();
        f(&grads, &mut params)
    }

    /// Zeroes out the gradient buffer.
    pub fn zero_grads(&self) {
        self.grads.fill(0.);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::{ChainedParamGen, ConstParamGen};

    #[test]
    fn buffers_match_aggregate_size() {
        let set = ParameterSet::from_sizes(&[4, 2, 3]).unwrap();

        assert_eq!(set.size(), 9);
        assert_eq!(set.params().len(), 9);
        assert_eq!(set.grads().len(), 9);
        assert_eq!(set.device(), None);
    }

    #[test]
    fn initialize_fills_every_parameter() {
        let set = ParameterSet::from_sizes(&[2, 3]).unwrap();
        let mut param_gen = ChainedParamGen::new(vec![
            Box::new(ConstParamGen::new(1., 2)),
            Box::new(ConstParamGen::new(2., 3)),
        ]);

        set.initialize(&mut param_gen).unwrap();
        assert_eq!(set.params().to_vec(), [1., 1., 2., 2., 2.]);
        assert_eq!(set.grads().to_vec(), [0.; 5]);
    }

    #[test]
    fn short_generator_is_rejected() {
        let set = ParameterSet::from_sizes(&[5]).unwrap();
        let mut param_gen = ConstParamGen::new(1., 3);

        assert!(matches!(
            set.initialize(&mut param_gen),
            Err(SyncErr::SizeMismatch {
                got: 3,
                expected: 5,
                ..
            })
        ));
    }

    /// Yields the same fixed sample forever, whatever it is asked for.
    struct Stuck(Vec<f32>);

    impl ParamGen for Stuck {
        fn sample(&mut self, _n: usize) -> Option<Vec<f32>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn empty_samples_end_initialization() {
        let set = ParameterSet::from_sizes(&[3]).unwrap();

        assert!(matches!(
            set.initialize(&mut Stuck(vec![])),
            Err(SyncErr::SizeMismatch {
                got: 0,
                expected: 3,
                ..
            })
        ));
    }

    #[test]
    fn oversized_samples_are_rejected() {
        let set = ParameterSet::from_sizes(&[3]).unwrap();

        assert!(matches!(
            set.initialize(&mut Stuck(vec![1.; 2])),
            Err(SyncErr::SizeMismatch {
                got: 4,
                expected: 3,
                ..
            })
        ));
        assert_eq!(set.params().to_vec(), [1., 1., 0.]);
    }

    #[test]
    fn tensor_views_write_into_flat_gradient() {
        let set = ParameterSet::from_sizes(&[2, 1]).unwrap();
        set.params().copy_from_slice(&[1., 2., 3.]).unwrap();

        set.with_tensors(|params, mut grads| {
            let bias = params.get(1)[0];
            grads.get_mut(0).iter_mut().for_each(|g| *g = bias);
        });

        assert_eq!(set.grads().to_vec(), [3., 3., 0.]);
    }
}
