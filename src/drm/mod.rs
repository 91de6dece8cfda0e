//! Raw interface to the radeon DRM kernel driver.

pub mod device;
pub mod ioctl;
