mod builder;
mod error;
mod training;

pub use error::ConfigErr;
pub use training::{
    DatasetConfig, DistributionConfig, InterconnectConfig, OptimizerConfig, ParamGenConfig,
    TrainingConfig,
};
