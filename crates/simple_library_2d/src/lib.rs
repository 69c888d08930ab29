//! A small 2D drawing library on top of an explicit GPU API.
//!
//! The host owns an [`Engine`] and drives it once per tick:
//!
//! ```no_run
//! # use simple_library_2d::*;
//! # use simple_library_2d::headless::*;
//! # fn main() -> EngineResult<()> {
//! let config = EngineConfig::default();
//! let mut engine = Engine::new(config, HeadlessWindow::default(), RecordingDevice::default());
//! engine.initialize()?;
//! while !engine.is_closed_window() {
//!     engine.update();
//!     engine.clear_screen()?;
//!     // draw calls go here
//!     engine.screen_flip()?;
//! #   break;
//! }
//! engine.finalize()?;
//! # Ok(())
//! # }
//! ```
//!
//! Every `screen_flip` blocks until the GPU has finished the frame, so at most
//! one frame is ever in flight.

pub mod engine;
pub mod engine_config;
pub mod engine_error;
pub mod fatal_notifier;
pub mod fence_context;
pub mod frame_graphics_controller;
pub mod graphics_device;
pub mod headless;
pub mod screen_space;
pub mod sync_fence;
pub mod texture_loader;
pub mod window;

#[cfg(windows)]
pub mod d3d12;
#[cfg(windows)]
pub mod win32;

pub use engine::Engine;
pub use engine_config::EngineConfig;
pub use engine_error::EngineError;
pub use engine_error::EngineResult;
pub use engine_error::InitStage;
pub use fatal_notifier::FatalNotifier;
pub use fatal_notifier::LogNotifier;
pub use fence_context::FenceContext;
pub use fence_context::WaitOutcome;
pub use frame_graphics_controller::FrameGraphicsController;
pub use frame_graphics_controller::FramePhase;
pub use graphics_device::GraphicsDevice;
pub use graphics_device::FRAME_COUNT;
pub use sync_fence::CancelToken;
pub use sync_fence::FenceWait;
pub use sync_fence::SyncFence;
pub use texture_loader::TextureKey;
pub use texture_loader::TextureLoader;
pub use window::Window;

pub use bevy_math::Vec2;
