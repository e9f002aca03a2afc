pub mod adb;
pub mod device;
pub mod snapshot;
pub mod traits;
pub mod uiautomator;

#[cfg(test)]
pub mod fake;

pub use device::AdbDevice;
pub use traits::DeviceControl;
