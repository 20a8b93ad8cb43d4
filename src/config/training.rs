use std::{collections::HashSet, fs, num::NonZeroUsize, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigErr;
use crate::{device::DeviceId, sync::Reduction};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum OptimizerConfig {
    Adam {
        learning_rate: f32,
        #[serde(default = "defaults::beta1")]
        beta1: f32,
        #[serde(default = "defaults::beta2")]
        beta2: f32,
        #[serde(default = "defaults::epsilon")]
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DistributionConfig {
    Uniform { low: f32, high: f32 },
    UniformInclusive { low: f32, high: f32 },
    XavierUniform { fan_in: usize, fan_out: usize },
    LecunUniform { fan_in: usize },
    Normal { mean: f32, std_dev: f32 },
    Kaiming { fan_in: usize },
    Xavier { fan_in: usize, fan_out: usize },
    Lecun { fan_in: usize },
}

/// How the root replica's parameters are initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ParamGenConfig {
    Const {
        value: f32,
        limit: usize,
    },
    Rand {
        distribution: DistributionConfig,
        limit: usize,
    },
    Chained {
        specs: Vec<ParamGenConfig>,
    },
}

impl ParamGenConfig {
    /// The amount of parameters this generator can produce.
    pub fn limit(&self) -> usize {
        match self {
            Self::Const { limit, .. } | Self::Rand { limit, .. } => *limit,
            Self::Chained { specs } => specs.iter().map(Self::limit).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DatasetConfig {
    /// A headerless CSV file, the last column is the target.
    Local { path: PathBuf },
    /// Rows of `x_size` features followed by their target.
    Inline { x_size: usize, data: Vec<f32> },
}

/// What is known about how the devices are wired together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterconnectConfig {
    /// Groups of devices sharing a board.
    pub boards: Vec<Vec<DeviceId>>,
    /// Device pairs with direct peer access.
    pub peer_access: Vec<(DeviceId, DeviceId)>,
}

/// The whole description of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// The devices to train on, the first one is the root.
    pub devices: Vec<DeviceId>,
    pub max_iter: usize,
    #[serde(default)]
    pub initial_iter: usize,
    pub batch_size: NonZeroUsize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub reduction: Reduction,
    /// Log the loss every this many iterations, `0` disables it.
    #[serde(default)]
    pub display: usize,
    pub optimizer: OptimizerConfig,
    pub param_gen: ParamGenConfig,
    #[serde(default)]
    pub interconnect: InterconnectConfig,
    pub data: DatasetConfig,
}

impl TrainingConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Arguments
    /// * `path` - The file to read.
    ///
    /// # Returns
    /// The configuration or the first problem found with it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigErr> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).map_err(|source| ConfigErr::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content)
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigErr> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the configured devices, the way the `--devices` flag does.
    pub fn with_devices(mut self, devices: Vec<DeviceId>) -> Result<Self, ConfigErr> {
        self.devices = devices;
        self.validate()?;
        Ok(self)
    }

    /// Checks the configuration is coherent before anything gets allocated.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.devices.is_empty() {
            return Err(ConfigErr::Invalid("at least one device is required".into()));
        }

        let mut seen = HashSet::with_capacity(self.devices.len());
        if let Some(dup) = self.devices.iter().find(|d| !seen.insert(**d)) {
            return Err(ConfigErr::Invalid(format!("device {dup} is listed twice")));
        }

        if self.initial_iter > self.max_iter {
            return Err(ConfigErr::Invalid(format!(
                "initial_iter ({}) cannot exceed max_iter ({})",
                self.initial_iter, self.max_iter
            )));
        }

        let known = |d: &DeviceId| self.devices.contains(d);
        let wired = self
            .interconnect
            .boards
            .iter()
            .flatten()
            .chain(self.interconnect.peer_access.iter().flat_map(|(a, b)| [a, b]));

        for device in wired {
            if !known(device) {
                return Err(ConfigErr::Invalid(format!(
                    "interconnect mentions device {device}, which isn't being trained on"
                )));
            }
        }

        if let DatasetConfig::Inline { x_size, data } = &self.data {
            let row = x_size + 1;

            if *x_size == 0 || data.is_empty() || data.len() % row != 0 {
                return Err(ConfigErr::Invalid(format!(
                    "inline dataset of {} values doesn't split into rows of {row}",
                    data.len()
                )));
            }

            let samples = data.len() / row;
            if samples < self.devices.len() {
                return Err(ConfigErr::Invalid(format!(
                    "{samples} samples can't be sharded among {} devices",
                    self.devices.len()
                )));
            }
        }

        self.validate_optimizer()
    }

    fn validate_optimizer(&self) -> Result<(), ConfigErr> {
        let learning_rate = match self.optimizer {
            OptimizerConfig::Adam { learning_rate, .. }
            | OptimizerConfig::GradientDescent { learning_rate }
            | OptimizerConfig::GradientDescentWithMomentum { learning_rate, .. } => learning_rate,
        };

        if !learning_rate.is_finite() || learning_rate <= 0. {
            return Err(ConfigErr::Invalid(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }

        Ok(())
    }
}

mod defaults {
    pub fn beta1() -> f32 {
        0.9
    }

    pub fn beta2() -> f32 {
        0.999
    }

    pub fn epsilon() -> f32 {
        1e-8
    }
}
