use std::{cell::RefCell, rc::Rc, sync::Arc};

use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{ConfigErr, DatasetConfig, DistributionConfig, OptimizerConfig, ParamGenConfig, TrainingConfig};
use crate::{
    data::InMemoryDataset,
    device::StaticInterconnect,
    initialization::{ChainedParamGen, ConstParamGen, ParamGen, RandErr, RandParamGen},
    models::LinearReplicas,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
    sync::{P2pSync, SyncOptions},
};

impl OptimizerConfig {
    /// Builds the optimizer of a replica holding `size` parameters.
    pub fn build(self, size: usize) -> Box<dyn Optimizer> {
        match self {
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(size, learning_rate, beta1, beta2, epsilon)),
            Self::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            Self::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(
                size,
                learning_rate,
                momentum,
            )),
        }
    }
}

impl DistributionConfig {
    fn build<R: Rng + 'static>(
        self,
        rng: Rc<RefCell<R>>,
        limit: usize,
    ) -> Result<Box<dyn ParamGen>, RandErr> {
        let param_gen: Box<dyn ParamGen> = match self {
            Self::Uniform { low, high } => Box::new(RandParamGen::uniform(rng, limit, low, high)?),
            Self::UniformInclusive { low, high } => {
                Box::new(RandParamGen::uniform_inclusive(rng, limit, low, high)?)
            }
            Self::XavierUniform { fan_in, fan_out } => {
                Box::new(RandParamGen::xavier_uniform(rng, limit, fan_in, fan_out)?)
            }
            Self::LecunUniform { fan_in } => {
                Box::new(RandParamGen::lecun_uniform(rng, limit, fan_in)?)
            }
            Self::Normal { mean, std_dev } => {
                Box::new(RandParamGen::normal(rng, limit, mean, std_dev)?)
            }
            Self::Kaiming { fan_in } => Box::new(RandParamGen::kaiming(rng, limit, fan_in)?),
            Self::Xavier { fan_in, fan_out } => {
                Box::new(RandParamGen::xavier(rng, limit, fan_in, fan_out)?)
            }
            Self::Lecun { fan_in } => Box::new(RandParamGen::lecun(rng, limit, fan_in)?),
        };

        Ok(param_gen)
    }
}

impl ParamGenConfig {
    /// Builds the generator, every random generator in it draws from `rng`.
    pub fn build<R: Rng + 'static>(
        &self,
        rng: Rc<RefCell<R>>,
    ) -> Result<Box<dyn ParamGen>, RandErr> {
        match self {
            Self::Const { value, limit } => Ok(Box::new(ConstParamGen::new(*value, *limit))),
            Self::Rand {
                distribution,
                limit,
            } => distribution.build(rng, *limit),
            Self::Chained { specs } => {
                let param_gens = specs
                    .iter()
                    .map(|spec| spec.build(Rc::clone(&rng)))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Box::new(ChainedParamGen::new(param_gens)))
            }
        }
    }
}

impl DatasetConfig {
    /// Loads the dataset into memory.
    pub fn load(&self) -> Result<InMemoryDataset, ConfigErr> {
        let dataset = match self {
            Self::Local { path } => InMemoryDataset::from_csv(path)?,
            Self::Inline { x_size, data } => {
                let (xs, ys) = data.chunks(x_size + 1).fold(
                    (Vec::new(), Vec::new()),
                    |(mut xs, mut ys), row| {
                        if let Some((y, x)) = row.split_last() {
                            xs.extend_from_slice(x);
                            ys.push(*y);
                        }
                        (xs, ys)
                    },
                );

                InMemoryDataset::new(*x_size, xs, ys)?
            }
        };

        Ok(dataset)
    }
}

impl TrainingConfig {
    /// The seed of the run, a random one is drawn if none was configured.
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            reduction: self.reduction,
            initial_iter: self.initial_iter,
            display: self.display,
        }
    }

    pub fn interconnect(&self) -> StaticInterconnect {
        StaticInterconnect::new(&self.interconnect.boards, &self.interconnect.peer_access)
    }

    /// Loads the data, initializes the root replica and builds the worker tree.
    ///
    /// # Returns
    /// A driver ready to `run(self.max_iter)`.
    pub fn build(&self) -> Result<P2pSync, ConfigErr> {
        let seed = self.resolve_seed();
        info!("seeding the run with {seed}");

        let dataset = Arc::new(self.data.load()?);
        let size = dataset.x_size() + 1;

        if self.param_gen.limit() < size {
            return Err(ConfigErr::Invalid(format!(
                "param_gen yields {} values, the model has {size} parameters",
                self.param_gen.limit()
            )));
        }

        let optimizer = self.optimizer;
        let replicas = LinearReplicas::new(
            dataset,
            self.devices.clone(),
            self.batch_size.get(),
            seed,
            move |size| optimizer.build(size),
        );

        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        let mut param_gen = self.param_gen.build(rng)?;

        let sync = P2pSync::new(
            &replicas,
            &self.devices,
            &self.interconnect(),
            param_gen.as_mut(),
            self.sync_options(),
        )?;

        Ok(sync)
    }
}
