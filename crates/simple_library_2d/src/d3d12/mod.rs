//! Direct3D 12 backend.

pub mod adapter_utils;
pub mod compile_shader;
pub mod create_device;
pub mod create_pipeline_state;
pub mod create_root_signature;
pub mod d3d12_device;
pub mod texture_upload;
pub mod transition_barrier;
pub mod upload_ring;
pub mod windows_error;

pub use d3d12_device::D3d12Device;
