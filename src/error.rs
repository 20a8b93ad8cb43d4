use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use crate::{device::DeviceId, initialization::RandErr};

/// The result type used across the synchronization engine.
pub type Result<T> = std::result::Result<T, SyncErr>;

/// Terminal failures of a data-parallel training run.
///
/// None of these are recoverable mid-run, they are reported to the operator and the
/// run is halted.
#[derive(Debug)]
pub enum SyncErr {
    /// A host or device buffer couldn't be allocated.
    ResourceExhaustion {
        device: Option<DeviceId>,
        elements: usize,
    },
    /// Two buffers that must share a layout have different lengths.
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// The device list handed to the topology builder is unusable.
    InvalidDevices(String),
    /// A background thread couldn't be spawned.
    ThreadStart { name: String, source: io::Error },
    /// A background thread panicked and couldn't be joined cleanly.
    ThreadJoin { name: String },
    /// A worker received a notification that the reduce/broadcast protocol doesn't allow.
    Protocol {
        device: DeviceId,
        expected: &'static str,
        got: String,
    },
    /// The run was stopped while this worker was waiting on its handoff queue.
    Stopped { device: DeviceId },
    /// The parameter initialization settings are invalid.
    Init(RandErr),
    /// A dataset couldn't be loaded or a data pipeline ran dry.
    Data(String),
}

impl Display for SyncErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhaustion {
                device: Some(device),
                elements,
            } => write!(f, "failed to allocate {elements} elements on device {device}"),
            Self::ResourceExhaustion {
                device: None,
                elements,
            } => write!(f, "failed to allocate {elements} elements on the host"),
            Self::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch in {what}: got {got}, expected {expected}"),
            Self::InvalidDevices(msg) => write!(f, "invalid device list: {msg}"),
            Self::ThreadStart { name, source } => {
                write!(f, "failed to start thread {name}: {source}")
            }
            Self::ThreadJoin { name } => write!(f, "failed to join thread {name}"),
            Self::Protocol {
                device,
                expected,
                got,
            } => write!(
                f,
                "protocol violation on device {device}: expected {expected}, got {got}"
            ),
            Self::Stopped { device } => write!(f, "device {device} was stopped mid-iteration"),
            Self::Init(e) => write!(f, "parameter initialization error: {e}"),
            Self::Data(msg) => write!(f, "data error: {msg}"),
        }
    }
}

impl Error for SyncErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ThreadStart { source, .. } => Some(source),
            Self::Init(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RandErr> for SyncErr {
    fn from(value: RandErr) -> Self {
        Self::Init(value)
    }
}
