use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use crate::{error::SyncErr, initialization::RandErr};

/// Failures loading a training configuration or turning it into a runnable job.
#[derive(Debug)]
pub enum ConfigErr {
    Io { path: PathBuf, source: io::Error },
    Parse(serde_json::Error),
    Invalid(String),
    Init(RandErr),
    Build(SyncErr),
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            Self::Parse(e) => write!(f, "malformed configuration: {e}"),
            Self::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Init(e) => write!(f, "invalid parameter initialization: {e}"),
            Self::Build(e) => write!(f, "failed to set up the run: {e}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::Init(e) => Some(e),
            Self::Build(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl From<RandErr> for ConfigErr {
    fn from(value: RandErr) -> Self {
        Self::Init(value)
    }
}

impl From<SyncErr> for ConfigErr {
    fn from(value: SyncErr) -> Self {
        Self::Build(value)
    }
}
