use std::path::Path;

use bevy_math::Vec2;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::engine_config::EngineConfig;
use crate::engine_error::EngineError;
use crate::engine_error::EngineResult;
use crate::engine_error::InitStage;
use crate::graphics_device::CpuDescriptorHandle;
use crate::graphics_device::GraphicsDevice;
use crate::graphics_device::ResourceState;
use crate::graphics_device::ScissorRect;
use crate::graphics_device::Viewport;
use crate::graphics_device::FRAME_COUNT;
use crate::screen_space::ScreenSpace;
use crate::sync_fence::FenceWait;
use crate::sync_fence::SyncFence;
use crate::texture_loader::TextureKey;

/// Whether a frame is currently being recorded.
///
/// `clear_screen` moves `Idle -> Recording`, `screen_flip` moves it back.
/// Calls made in the wrong phase are rejected and change nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Recording,
}

/// Owns the swap chain, its render targets and their views, and sequences
/// each frame: clear, draw, present, then wait for the GPU.
pub struct FrameGraphicsController<D: GraphicsDevice> {
    device: D,
    swap_chain: D::SwapChain,
    render_targets: [D::RenderTarget; FRAME_COUNT as usize],
    // Only the views inside it are addressed, the heap just has to stay alive.
    _rtv_heap: D::DescriptorHeap,
    rtv_heap_start: CpuDescriptorHandle,
    rtv_descriptor_size: u32,
    viewport: Viewport,
    scissor_rect: ScissorRect,
    screen: ScreenSpace,
    frame_index: u32,
    phase: FramePhase,
    sync_fence: SyncFence<D>,
    clear_color: [f32; 4],
    draw_color: [f32; 4],
    sync_interval: u32,
    finalized: bool,
}

impl<D: GraphicsDevice> FrameGraphicsController<D> {
    /// Builds every GPU object needed to draw into `surface`, in order.
    ///
    /// Stops at the first failure. Nothing is submitted to the GPU before the
    /// first `screen_flip`, so a failed startup leaves the queue untouched.
    pub fn initialize(
        mut device: D,
        surface: &D::Surface,
        (width, height): (u32, u32),
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        device.create_device().map_err(InitStage::Device.failure())?;
        device
            .create_command_queue()
            .map_err(InitStage::CommandQueue.failure())?;
        let swap_chain = device
            .create_swap_chain(surface, width, height, FRAME_COUNT)
            .map_err(InitStage::SwapChain.failure())?;
        device
            .create_root_signature()
            .map_err(InitStage::RootSignature.failure())?;
        device
            .create_pipeline_state()
            .map_err(InitStage::PipelineState.failure())?;
        device
            .create_command_allocator()
            .map_err(InitStage::CommandAllocator.failure())?;
        device
            .create_command_list()
            .map_err(InitStage::CommandList.failure())?;

        let rtv_heap = device
            .create_rtv_heap(FRAME_COUNT)
            .map_err(InitStage::RtvHeap.failure())?;
        let rtv_heap_start = device.rtv_heap_start(&rtv_heap);
        let rtv_descriptor_size = device.rtv_descriptor_size();

        let render_targets: [D::RenderTarget; FRAME_COUNT as usize] =
            array_init::try_array_init(|i| device.back_buffer(&swap_chain, i as u32))
                .map_err(InitStage::RenderTargetViews.failure())?;
        for (i, target) in render_targets.iter().enumerate() {
            device.create_render_target_view(
                target,
                rtv_heap_start.offset(i as u32, rtv_descriptor_size),
            );
        }

        let frame_index = checked_frame_index(device.current_back_buffer_index(&swap_chain))
            .map_err(InitStage::SwapChain.failure())?;

        let sync_fence = SyncFence::initialize(&device, FenceWait::from_config(config))?;

        info!(width, height, frame_index, "Frame graphics initialized");
        Ok(Self {
            device,
            swap_chain,
            render_targets,
            _rtv_heap: rtv_heap,
            rtv_heap_start,
            rtv_descriptor_size,
            viewport: Viewport::covering(width, height),
            scissor_rect: ScissorRect::covering(width, height),
            screen: ScreenSpace::new(width, height),
            frame_index,
            phase: FramePhase::Idle,
            sync_fence,
            clear_color: config.clear_color,
            draw_color: [1.0, 1.0, 1.0, 1.0],
            sync_interval: config.sync_interval,
            finalized: false,
        })
    }

    /// Starts a frame: reopens the command list, moves the current back buffer
    /// into the render target state, binds it and clears it.
    pub fn clear_screen(&mut self) -> EngineResult<()> {
        self.ensure_live()?;
        if self.phase == FramePhase::Recording {
            return Err(EngineError::FrameAlreadyOpen);
        }

        // A flip whose wait failed left the allocator possibly in use; only
        // reset it once the GPU is confirmed past that frame.
        self.sync_fence.wait_for_unconfirmed(&self.device)?;
        self.device.reset_command_allocator()?;
        self.device.reset_command_list()?;

        let target = &self.render_targets[self.frame_index as usize];
        self.device
            .resource_barrier(target, ResourceState::Present, ResourceState::RenderTarget);

        let rtv = self.rtv_handle(self.frame_index);
        self.device.set_render_target(rtv);
        self.device.set_viewport(&self.viewport, &self.scissor_rect);
        self.device.clear_render_target(rtv, self.clear_color);

        self.phase = FramePhase::Recording;
        debug!(frame_index = self.frame_index, "Frame opened");
        Ok(())
    }

    pub fn draw_triangle(
        &mut self,
        lower_left: Vec2,
        upper_left: Vec2,
        lower_right: Vec2,
    ) -> EngineResult<()> {
        self.ensure_recording()?;
        let vertices = self
            .screen
            .triangle(lower_left, upper_left, lower_right, self.draw_color);
        self.device.draw_colored(&vertices)?;
        Ok(())
    }

    pub fn draw_rect(
        &mut self,
        lower_left: Vec2,
        upper_left: Vec2,
        upper_right: Vec2,
        lower_right: Vec2,
    ) -> EngineResult<()> {
        self.ensure_recording()?;
        let vertices = self.screen.rect(
            lower_left,
            upper_left,
            upper_right,
            lower_right,
            self.draw_color,
        );
        self.device.draw_colored(&vertices)?;
        Ok(())
    }

    /// Draws a loaded texture at its native size with its top-left corner at (`x`, `y`).
    pub fn draw_texture(&mut self, x: f32, y: f32, key: TextureKey) -> EngineResult<()> {
        self.ensure_recording()?;
        let (width, height) = self
            .device
            .texture_size(key)
            .ok_or(EngineError::UnknownTexture(key))?;
        let vertices = self
            .screen
            .textured_quad(Vec2::new(x, y), Vec2::new(width as f32, height as f32));
        self.device.draw_textured(key, &vertices)?;
        Ok(())
    }

    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> EngineResult<TextureKey> {
        self.ensure_live()?;
        let path = path.as_ref();
        let key = self
            .device
            .load_texture(path)
            .map_err(|report| EngineError::TextureLoad {
                path: path.to_path_buf(),
                report,
            })?;
        debug!(?key, path = %path.display(), "Loaded texture");
        Ok(key)
    }

    /// Ends the frame: back buffer to present state, submit, present, then
    /// block until the GPU has finished everything submitted so far.
    pub fn screen_flip(&mut self) -> EngineResult<()> {
        self.ensure_recording()?;

        let target = &self.render_targets[self.frame_index as usize];
        self.device
            .resource_barrier(target, ResourceState::RenderTarget, ResourceState::Present);
        self.device.close_command_list()?;
        self.phase = FramePhase::Idle;

        self.device.execute_command_list()?;
        // Work is queued now; wait on it even if present fails so the next
        // clear_screen never resets an allocator the GPU is still reading.
        let presented = self.device.present(&self.swap_chain, self.sync_interval);
        // Track the swap chain even if the wait below fails.
        let frame_index =
            checked_frame_index(self.device.current_back_buffer_index(&self.swap_chain));
        if let Ok(index) = &frame_index {
            self.frame_index = *index;
        }
        self.sync_fence.wait_for_previous_frame(&self.device)?;

        presented?;
        frame_index?;
        debug!(frame_index = self.frame_index, "Frame presented");
        Ok(())
    }

    /// Blocks until the GPU has finished all submitted work.
    pub fn wait_for_previous_frame(&mut self) -> EngineResult<()> {
        self.ensure_live()?;
        self.sync_fence.wait_for_previous_frame(&self.device)
    }

    /// Drains the GPU, then releases the fence. Later calls do nothing.
    pub fn finalize(&mut self) -> EngineResult<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        if self.phase == FramePhase::Recording {
            warn!("Finalizing with an open frame, discarding its commands");
            if let Err(report) = self.device.close_command_list() {
                warn!("Failed to close the command list: {report}");
            }
            self.phase = FramePhase::Idle;
        }

        let drained = self.sync_fence.wait_for_previous_frame(&self.device);
        if let Err(error) = &drained {
            warn!("GPU did not drain before teardown: {error}");
        }
        self.sync_fence.finalize(&self.device);
        info!("Frame graphics finalized");
        drained
    }

    pub fn set_draw_color(&mut self, color: [f32; 4]) {
        self.draw_color = color;
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// RTV for swap chain buffer `index`.
    pub fn rtv_handle(&self, index: u32) -> CpuDescriptorHandle {
        self.rtv_heap_start.offset(index, self.rtv_descriptor_size)
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn scissor_rect(&self) -> &ScissorRect {
        &self.scissor_rect
    }

    pub fn sync_fence(&self) -> &SyncFence<D> {
        &self.sync_fence
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.finalized {
            return Err(EngineError::NotInitialized);
        }
        Ok(())
    }

    fn ensure_recording(&self) -> EngineResult<()> {
        self.ensure_live()?;
        if self.phase != FramePhase::Recording {
            return Err(EngineError::FrameNotOpen);
        }
        Ok(())
    }
}

fn checked_frame_index(index: u32) -> eyre::Result<u32> {
    if index >= FRAME_COUNT {
        eyre::bail!("swap chain reported back buffer {index}, expected less than {FRAME_COUNT}");
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::headless::GpuCall;
    use crate::headless::GpuTimeline;
    use crate::headless::HeadlessSurface;
    use crate::headless::RecordingDevice;

    fn controller(device: RecordingDevice) -> FrameGraphicsController<RecordingDevice> {
        FrameGraphicsController::initialize(
            device,
            &HeadlessSurface,
            (640, 480),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn initialize_creates_one_view_per_buffer() {
        let device = RecordingDevice::default();
        let probe = device.probe();
        let graphics = controller(device);

        let views: Vec<_> = probe
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                GpuCall::CreateRenderTargetView { buffer, handle } => Some((buffer, handle)),
                _ => None,
            })
            .collect();
        assert_eq!(views.len(), FRAME_COUNT as usize);
        for (buffer, handle) in views {
            assert_eq!(handle, graphics.rtv_handle(buffer));
        }
        assert_eq!(graphics.viewport().width, 640.0);
        assert_eq!(graphics.scissor_rect().bottom, 480);
        assert_eq!(graphics.phase(), FramePhase::Idle);
    }

    #[test]
    fn every_stage_failure_is_reported_without_submitting() {
        let stages = [
            InitStage::Device,
            InitStage::CommandQueue,
            InitStage::SwapChain,
            InitStage::RootSignature,
            InitStage::PipelineState,
            InitStage::CommandAllocator,
            InitStage::CommandList,
            InitStage::RtvHeap,
            InitStage::RenderTargetViews,
            InitStage::Fence,
            InitStage::FenceEvent,
        ];
        for stage in stages {
            let device = RecordingDevice::default().failing_at(stage);
            let probe = device.probe();
            let result = FrameGraphicsController::initialize(
                device,
                &HeadlessSurface,
                (640, 480),
                &EngineConfig::default(),
            );
            match result {
                Err(EngineError::InitializationFailure { stage: failed, .. }) => {
                    assert_eq!(failed, stage)
                }
                Err(other) => panic!("{stage}: unexpected error {other}"),
                Ok(_) => panic!("{stage}: initialize should have failed"),
            }
            assert_eq!(probe.submissions(), 0, "{stage} submitted GPU work");
        }
    }

    #[test]
    fn clear_screen_records_begin_frame_sequence() {
        let device = RecordingDevice::default();
        let probe = device.probe();
        let mut graphics = controller(device);
        probe.clear_calls();

        graphics.clear_screen().unwrap();

        let rtv = graphics.rtv_handle(0);
        assert_eq!(
            probe.calls(),
            vec![
                GpuCall::ResetCommandAllocator,
                GpuCall::ResetCommandList,
                GpuCall::ResourceBarrier {
                    buffer: 0,
                    before: ResourceState::Present,
                    after: ResourceState::RenderTarget,
                },
                GpuCall::SetRenderTarget(rtv),
                GpuCall::SetViewport,
                GpuCall::ClearRenderTarget {
                    handle: rtv,
                    color: EngineConfig::default().clear_color,
                },
            ]
        );
        assert_eq!(graphics.phase(), FramePhase::Recording);
    }

    #[test]
    fn second_clear_screen_is_rejected_without_side_effects() {
        let device = RecordingDevice::default();
        let probe = device.probe();
        let mut graphics = controller(device);

        graphics.clear_screen().unwrap();
        let recorded = probe.calls().len();

        assert!(matches!(
            graphics.clear_screen(),
            Err(EngineError::FrameAlreadyOpen)
        ));
        assert_eq!(probe.calls().len(), recorded);
        assert_eq!(graphics.phase(), FramePhase::Recording);

        // The open frame is still usable.
        graphics.screen_flip().unwrap();
    }

    #[test]
    fn drawing_outside_a_frame_is_rejected() {
        let mut graphics = controller(RecordingDevice::default());
        let corner = Vec2::ZERO;

        assert!(matches!(
            graphics.draw_triangle(corner, corner, corner),
            Err(EngineError::FrameNotOpen)
        ));
        assert!(matches!(
            graphics.draw_rect(corner, corner, corner, corner),
            Err(EngineError::FrameNotOpen)
        ));
        assert!(matches!(
            graphics.screen_flip(),
            Err(EngineError::FrameNotOpen)
        ));
    }

    #[test]
    fn frame_index_cycles_through_every_buffer() {
        let device = RecordingDevice::default();
        let probe = device.probe();
        let mut graphics = controller(device);

        let mut seen = Vec::new();
        for _ in 0..(FRAME_COUNT * 3) {
            graphics.clear_screen().unwrap();
            graphics.screen_flip().unwrap();
            assert!(graphics.frame_index() < FRAME_COUNT);
            assert_eq!(graphics.frame_index(), probe.back_buffer_index());
            seen.push(graphics.frame_index());
        }
        assert_eq!(seen, vec![1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn allocator_is_never_reset_while_gpu_is_busy() {
        // The recording device errors if the allocator is reset with work in flight.
        let mut graphics = controller(RecordingDevice::default());
        for _ in 0..10 {
            graphics.clear_screen().unwrap();
            graphics
                .draw_triangle(Vec2::ZERO, Vec2::new(0.0, 10.0), Vec2::new(10.0, 0.0))
                .unwrap();
            graphics.screen_flip().unwrap();
        }
    }

    #[test]
    fn failed_present_still_waits_for_the_gpu() {
        let device = RecordingDevice::default();
        let probe = device.probe();
        let mut graphics = controller(device);
        probe.fail_next_present();

        graphics.clear_screen().unwrap();
        assert!(matches!(graphics.screen_flip(), Err(EngineError::Backend(_))));
        assert_eq!(probe.signaled_values(), vec![1]);
        assert_eq!(graphics.phase(), FramePhase::Idle);

        graphics.clear_screen().unwrap();
        graphics.screen_flip().unwrap();
    }

    #[test]
    fn timed_out_flip_keeps_the_allocator_until_the_gpu_catches_up() {
        let device = RecordingDevice::with_timeline(GpuTimeline::Hung);
        let probe = device.probe();
        let config = EngineConfig {
            fence_timeout: Some(Duration::from_millis(20)),
            fence_poll_interval: Duration::from_millis(5),
            ..EngineConfig::default()
        };
        let mut graphics =
            FrameGraphicsController::initialize(device, &HeadlessSurface, (640, 480), &config)
                .unwrap();

        graphics.clear_screen().unwrap();
        assert!(matches!(
            graphics.screen_flip(),
            Err(EngineError::DeviceLost { fence_value: 1, .. })
        ));
        assert_eq!(graphics.frame_index(), probe.back_buffer_index());
        assert_eq!(graphics.sync_fence().unconfirmed(), Some(1));

        probe.clear_calls();
        assert!(matches!(
            graphics.clear_screen(),
            Err(EngineError::DeviceLost { fence_value: 1, .. })
        ));
        assert_eq!(
            probe.count(|call| matches!(call, GpuCall::ResetCommandAllocator)),
            0
        );
        assert_eq!(graphics.phase(), FramePhase::Idle);
    }

    #[test]
    fn cancelled_flip_recovers_once_the_token_is_reset() {
        let device = RecordingDevice::with_timeline(GpuTimeline::Deferred);
        let probe = device.probe();
        let mut graphics = controller(device);
        let cancel = graphics.sync_fence().cancel_token().clone();

        graphics.clear_screen().unwrap();
        cancel.cancel();
        assert!(matches!(
            graphics.screen_flip(),
            Err(EngineError::WaitCancelled { fence_value: 1 })
        ));
        assert_eq!(graphics.frame_index(), probe.back_buffer_index());

        cancel.reset();
        graphics.clear_screen().unwrap();
        graphics.screen_flip().unwrap();

        assert_eq!(probe.signaled_values(), vec![1, 2]);
        assert_eq!(graphics.sync_fence().unconfirmed(), None);
        assert_eq!(graphics.frame_index(), probe.back_buffer_index());
    }

    #[test]
    fn draw_texture_needs_a_loaded_key() {
        let mut graphics = controller(RecordingDevice::default());
        graphics.clear_screen().unwrap();
        let missing = TextureKey::new(7);
        assert!(matches!(
            graphics.draw_texture(0.0, 0.0, missing),
            Err(EngineError::UnknownTexture(key)) if key == missing
        ));
    }

    #[test]
    fn finalize_drains_then_releases_once() {
        let device = RecordingDevice::default();
        let probe = device.probe();
        let mut graphics = controller(device);

        graphics.clear_screen().unwrap();
        graphics.screen_flip().unwrap();
        graphics.finalize().unwrap();
        graphics.finalize().unwrap();

        assert_eq!(probe.fence_releases(), 1);
        assert_eq!(probe.signaled_values(), vec![1, 2]);
        assert!(graphics.sync_fence().is_released());
        assert!(graphics.is_finalized());
        assert!(matches!(
            graphics.clear_screen(),
            Err(EngineError::NotInitialized)
        ));
    }
}
