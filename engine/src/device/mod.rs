//! The device abstraction and the state machine the scheduler drives each
//! open device through.

pub mod iodev;

#[cfg(target_os = "linux")]
pub mod alsa;

pub use iodev::{Device, DevState, HwTimestamp, IoDev};
