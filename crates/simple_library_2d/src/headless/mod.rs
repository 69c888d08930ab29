//! A backend without a GPU or a window.
//!
//! [`RecordingDevice`] logs every call it receives and simulates the GPU
//! timeline, which makes it usable for tests and for running the engine on
//! machines without Direct3D 12.

pub mod headless_window;
pub mod recording_device;

pub use headless_window::HeadlessSurface;
pub use headless_window::HeadlessWindow;
pub use recording_device::DeviceProbe;
pub use recording_device::GpuCall;
pub use recording_device::GpuTimeline;
pub use recording_device::RecordingDevice;
