//! Cassette runtime: the bytecode virtual machine, runtime environments,
//! the primitive suite, and the device boundary it delegates I/O through.

pub mod device;
pub mod env;
pub mod error;
pub mod primitives;
pub mod trace;
pub mod vm;

pub use device::{Device, DeviceManager};
pub use error::{ErrorKind, VmError};
pub use vm::{Status, Vm};
