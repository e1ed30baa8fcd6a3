pub mod capture;
pub mod inject;
pub mod interface;

pub use capture::{CaptureHandle, LiveCapture, PacketCapture};
pub use inject::{Injector, RawInjector, StreamInjector};
pub use interface::{CaptureDevice, DeviceError, list_devices, resolve_device};
