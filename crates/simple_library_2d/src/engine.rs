use std::path::Path;

use bevy_math::Vec2;
use eyre::eyre;
use tracing::info;
use tracing::warn;

use crate::engine_config::EngineConfig;
use crate::engine_error::EngineError;
use crate::engine_error::EngineResult;
use crate::engine_error::InitStage;
use crate::fatal_notifier::FatalNotifier;
use crate::fatal_notifier::LogNotifier;
use crate::frame_graphics_controller::FrameGraphicsController;
use crate::graphics_device::GraphicsDevice;
use crate::texture_loader::TextureKey;
use crate::window::Window;

enum Graphics<D: GraphicsDevice> {
    /// Device handed in by the host, nothing created yet.
    Pending(D),
    Ready(FrameGraphicsController<D>),
    /// A startup attempt consumed the device and failed.
    Failed,
}

/// The library entry point: a window plus the graphics drawn into it.
///
/// Shutdown happens in two phases, GPU first and window second, either via
/// [`finalize`](Engine::finalize) or when the engine is dropped.
pub struct Engine<W, D>
where
    D: GraphicsDevice,
    W: Window<Surface = D::Surface>,
{
    config: EngineConfig,
    // Declared before `window` so swap chain objects are released first.
    graphics: Graphics<D>,
    window: W,
    notifier: Box<dyn FatalNotifier>,
    window_finalized: bool,
}

impl<W, D> Engine<W, D>
where
    D: GraphicsDevice,
    W: Window<Surface = D::Surface>,
{
    pub fn new(config: EngineConfig, mut window: W, device: D) -> Self {
        let (width, height) = config.window_size;
        window.set_window_size(width, height);
        Self {
            config,
            window,
            graphics: Graphics::Pending(device),
            notifier: Box::new(LogNotifier),
            window_finalized: false,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn FatalNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Opens the window, then builds the graphics objects for it.
    ///
    /// Stops at the first failure without undoing earlier steps. Fatal
    /// startup errors are also shown through the [`FatalNotifier`].
    pub fn initialize(&mut self) -> EngineResult<()> {
        let result = self.try_initialize();
        if let Err(error) = &result {
            if error.is_fatal_startup() {
                self.notifier.notify(&self.config.title, &error.to_string());
            }
        }
        result
    }

    fn try_initialize(&mut self) -> EngineResult<()> {
        if self.window_finalized {
            return Err(EngineError::NotInitialized);
        }
        match &self.graphics {
            Graphics::Ready(_) => {
                warn!("Engine is already initialized");
                return Ok(());
            }
            Graphics::Failed => return Err(EngineError::NotInitialized),
            Graphics::Pending(_) => {}
        }

        self.window
            .initialize()
            .map_err(InitStage::Window.failure())?;
        let surface = self
            .window
            .surface()
            .ok_or_else(|| InitStage::Window.failure()(eyre!("window has no native surface")))?;

        let Graphics::Pending(device) = std::mem::replace(&mut self.graphics, Graphics::Failed)
        else {
            return Err(EngineError::NotInitialized);
        };
        let controller = FrameGraphicsController::initialize(
            device,
            surface,
            self.window.window_size(),
            &self.config,
        )?;
        self.graphics = Graphics::Ready(controller);
        info!(title = %self.config.title, "Engine initialized");
        Ok(())
    }

    /// Pumps the window's messages once.
    pub fn update(&mut self) {
        self.window.update();
    }

    pub fn is_closed_window(&self) -> bool {
        self.window.is_closed()
    }

    /// Takes effect when called before [`initialize`](Engine::initialize); the
    /// swap chain is never resized afterwards.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        if matches!(self.graphics, Graphics::Ready(_)) {
            warn!(
                width,
                height,
                "Window size changed after startup, the swap chain keeps its size"
            );
        }
        self.config.window_size = (width, height);
        self.window.set_window_size(width, height);
    }

    pub fn clear_screen(&mut self) -> EngineResult<()> {
        self.graphics_mut()?.clear_screen()
    }

    pub fn draw_triangle(
        &mut self,
        lower_left: Vec2,
        upper_left: Vec2,
        lower_right: Vec2,
    ) -> EngineResult<()> {
        self.graphics_mut()?
            .draw_triangle(lower_left, upper_left, lower_right)
    }

    pub fn draw_rect(
        &mut self,
        lower_left: Vec2,
        upper_left: Vec2,
        upper_right: Vec2,
        lower_right: Vec2,
    ) -> EngineResult<()> {
        self.graphics_mut()?
            .draw_rect(lower_left, upper_left, upper_right, lower_right)
    }

    pub fn set_draw_color(&mut self, color: [f32; 4]) -> EngineResult<()> {
        self.graphics_mut()?.set_draw_color(color);
        Ok(())
    }

    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> EngineResult<TextureKey> {
        self.graphics_mut()?.load_texture(path)
    }

    pub fn draw_texture(&mut self, x: f32, y: f32, key: TextureKey) -> EngineResult<()> {
        self.graphics_mut()?.draw_texture(x, y, key)
    }

    /// Presents the frame and waits for the GPU to finish it.
    pub fn screen_flip(&mut self) -> EngineResult<()> {
        self.graphics_mut()?.screen_flip()
    }

    pub fn wait_for_previous_frame(&mut self) -> EngineResult<()> {
        self.graphics_mut()?.wait_for_previous_frame()
    }

    /// Drains the GPU and releases graphics objects, then tears down the window.
    /// Later calls do nothing.
    pub fn finalize(&mut self) -> EngineResult<()> {
        let drained = match &mut self.graphics {
            Graphics::Ready(controller) => controller.finalize(),
            Graphics::Pending(_) | Graphics::Failed => Ok(()),
        };
        if !self.window_finalized {
            self.window.finalize();
            self.window_finalized = true;
            info!("Engine finalized");
        }
        drained
    }

    pub fn graphics(&self) -> Option<&FrameGraphicsController<D>> {
        match &self.graphics {
            Graphics::Ready(controller) => Some(controller),
            Graphics::Pending(_) | Graphics::Failed => None,
        }
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn graphics_mut(&mut self) -> EngineResult<&mut FrameGraphicsController<D>> {
        match &mut self.graphics {
            Graphics::Ready(controller) => Ok(controller),
            Graphics::Pending(_) | Graphics::Failed => Err(EngineError::NotInitialized),
        }
    }
}

impl<W, D> Drop for Engine<W, D>
where
    D: GraphicsDevice,
    W: Window<Surface = D::Surface>,
{
    fn drop(&mut self) {
        if let Err(error) = self.finalize() {
            warn!("Engine teardown failed: {error}");
        }
    }
}
