pub mod fleet;
pub mod machine;
pub mod scheduler;

pub use fleet::DeviceFleet;
pub use machine::{DeviceError, DeviceHandle};
