mod buffer;
mod device_set;
mod layout;
mod set;

pub use buffer::DeviceBuffer;
pub use device_set::DeviceParameterSet;
pub use layout::{ParamLayout, Tensors, TensorsMut};
pub use set::ParameterSet;
