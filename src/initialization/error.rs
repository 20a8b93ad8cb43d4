use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

/// The result type of the `RandParamGen` constructors.
pub type Result<T> = std::result::Result<T, RandErr>;

/// A random parameter generator was configured with values its distribution rejects.
///
/// The distribution's own error is kept as the source, the variant tells which family
/// of initializers refused it.
#[derive(Debug)]
pub enum RandErr {
    /// Bad bounds for a uniform, Xavier uniform or LeCun uniform initializer.
    Uniform(UniformError),
    /// Bad mean or deviation for a normal, Kaiming, Xavier or LeCun initializer.
    Normal(NormalError),
}

impl From<UniformError> for RandErr {
    fn from(value: UniformError) -> Self {
        Self::Uniform(value)
    }
}

impl From<NormalError> for RandErr {
    fn from(value: NormalError) -> Self {
        Self::Normal(value)
    }
}

impl Display for RandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform(e) => write!(f, "uniform initializer rejected its bounds: {e}"),
            Self::Normal(e) => write!(f, "normal initializer rejected its parameters: {e}"),
        }
    }
}

impl Error for RandErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Uniform(e) => Some(e),
            Self::Normal(e) => Some(e),
        }
    }
}
