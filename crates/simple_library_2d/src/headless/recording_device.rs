use std::cell::RefCell;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use eyre::eyre;
use eyre::WrapErr;
use tracing::trace;

use crate::engine_error::InitStage;
use crate::fence_context::FenceContext;
use crate::fence_context::WaitOutcome;
use crate::graphics_device::ColorVertex;
use crate::graphics_device::CpuDescriptorHandle;
use crate::graphics_device::GraphicsDevice;
use crate::graphics_device::ResourceState;
use crate::graphics_device::ScissorRect;
use crate::graphics_device::TexturedVertex;
use crate::graphics_device::Viewport;
use crate::headless::headless_window::HeadlessSurface;
use crate::texture_loader::TextureKey;
use crate::texture_loader::TextureLoader;

const RTV_HEAP_START: usize = 0x1000;
const RTV_DESCRIPTOR_SIZE: u32 = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateDevice,
    CreateCommandQueue,
    CreateSwapChain {
        width: u32,
        height: u32,
        buffer_count: u32,
    },
    CreateRootSignature,
    CreatePipelineState,
    CreateCommandAllocator,
    CreateCommandList,
    CreateRtvHeap {
        descriptor_count: u32,
    },
    CreateRenderTargetView {
        buffer: u32,
        handle: CpuDescriptorHandle,
    },
    CreateFence {
        initial_value: u64,
    },
    CreateEvent,
    ResetCommandAllocator,
    ResetCommandList,
    ResourceBarrier {
        buffer: u32,
        before: ResourceState,
        after: ResourceState,
    },
    SetViewport,
    SetRenderTarget(CpuDescriptorHandle),
    ClearRenderTarget {
        handle: CpuDescriptorHandle,
        color: [f32; 4],
    },
    DrawColored {
        vertex_count: usize,
    },
    DrawTextured {
        texture: TextureKey,
        vertex_count: usize,
    },
    CloseCommandList,
    ExecuteCommandList,
    Present {
        sync_interval: u32,
    },
    Signal {
        value: u64,
    },
    SetEventOnCompletion {
        value: u64,
    },
    WaitEvent,
    ReleaseFence,
    CloseEvent,
    LoadTexture {
        path: PathBuf,
    },
}

/// How the simulated GPU makes progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuTimeline {
    /// Work completes as soon as it is signaled.
    Immediate,
    /// Work completes when the CPU waits on an armed event.
    #[default]
    Deferred,
    /// Nothing ever completes. Waits time out.
    Hung,
}

#[derive(Debug, Default)]
struct RecordingState {
    calls: Vec<GpuCall>,
    timeline: GpuTimeline,
    fail_at: Option<InitStage>,
    fail_next_present: bool,
    last_signaled: u64,
    completed: u64,
    armed: Option<u64>,
    buffer_count: u32,
    back_buffer_index: u32,
    list_open: bool,
    // Executed command lists with no signal queued behind them yet.
    unfenced_work: bool,
    // Signal value that covers the most recently executed command list.
    work_fence: Option<u64>,
    fence_releases: u32,
    events_closed: u32,
    textures: Vec<(u32, u32)>,
}

impl RecordingState {
    fn work_in_flight(&self) -> bool {
        self.unfenced_work || self.work_fence.is_some_and(|value| self.completed < value)
    }
}

/// A [`GraphicsDevice`] that records calls instead of talking to a GPU.
///
/// It also checks the rules a real driver would enforce: the allocator may not
/// be reset while its commands are executing, and commands may only be
/// recorded into an open list.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    state: Rc<RefCell<RecordingState>>,
}

/// Read access to a [`RecordingDevice`] that stays valid after the device is
/// moved into an engine.
#[derive(Debug, Clone)]
pub struct DeviceProbe {
    state: Rc<RefCell<RecordingState>>,
}

#[derive(Debug)]
pub struct RecordedFence(());

#[derive(Debug)]
pub struct RecordedEvent(());

#[derive(Debug)]
pub struct RecordedSwapChain {
    pub buffer_count: u32,
}

#[derive(Debug)]
pub struct RecordedBuffer {
    pub index: u32,
}

#[derive(Debug)]
pub struct RecordedHeap {
    pub start: CpuDescriptorHandle,
}

impl RecordingDevice {
    pub fn with_timeline(timeline: GpuTimeline) -> Self {
        let device = Self::default();
        device.state.borrow_mut().timeline = timeline;
        device
    }

    /// Makes the creation step for `stage` fail.
    pub fn failing_at(self, stage: InitStage) -> Self {
        self.state.borrow_mut().fail_at = Some(stage);
        self
    }

    pub fn probe(&self) -> DeviceProbe {
        DeviceProbe {
            state: Rc::clone(&self.state),
        }
    }

    fn record(&self, call: GpuCall) {
        trace!(?call, "gpu");
        self.state.borrow_mut().calls.push(call);
    }

    fn create_step(&self, stage: InitStage, call: GpuCall) -> eyre::Result<()> {
        self.record(call);
        if self.state.borrow().fail_at == Some(stage) {
            return Err(eyre!("injected {stage} failure"));
        }
        Ok(())
    }

    fn record_command(&self, call: GpuCall) -> eyre::Result<()> {
        if !self.state.borrow().list_open {
            return Err(eyre!("{call:?} recorded into a closed command list"));
        }
        self.record(call);
        Ok(())
    }
}

impl DeviceProbe {
    pub fn calls(&self) -> Vec<GpuCall> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&GpuCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|&call| predicate(call)).count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Command lists executed plus signals queued.
    pub fn submissions(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::ExecuteCommandList | GpuCall::Signal { .. }))
    }

    pub fn executions(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::ExecuteCommandList))
    }

    pub fn presents(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::Present { .. }))
    }

    pub fn waits(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::WaitEvent))
    }

    pub fn signaled_values(&self) -> Vec<u64> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                GpuCall::Signal { value } => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn completed_value(&self) -> u64 {
        self.state.borrow().completed
    }

    pub fn back_buffer_index(&self) -> u32 {
        self.state.borrow().back_buffer_index
    }

    pub fn fence_releases(&self) -> u32 {
        self.state.borrow().fence_releases
    }

    pub fn events_closed(&self) -> u32 {
        self.state.borrow().events_closed
    }

    pub fn textures_loaded(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn fail_next_present(&self) {
        self.state.borrow_mut().fail_next_present = true;
    }
}

impl FenceContext for RecordingDevice {
    type Fence = RecordedFence;
    type Event = RecordedEvent;

    fn create_fence(&self, initial_value: u64) -> eyre::Result<Self::Fence> {
        self.create_step(InitStage::Fence, GpuCall::CreateFence { initial_value })?;
        self.state.borrow_mut().completed = initial_value;
        Ok(RecordedFence(()))
    }

    fn create_event(&self) -> eyre::Result<Self::Event> {
        self.create_step(InitStage::FenceEvent, GpuCall::CreateEvent)?;
        Ok(RecordedEvent(()))
    }

    fn signal(&self, _fence: &Self::Fence, value: u64) -> eyre::Result<()> {
        self.record(GpuCall::Signal { value });
        let mut state = self.state.borrow_mut();
        if value < state.last_signaled {
            return Err(eyre!(
                "fence signaled backwards: {value} after {}",
                state.last_signaled
            ));
        }
        state.last_signaled = value;
        if state.unfenced_work {
            state.unfenced_work = false;
            state.work_fence = Some(value);
        }
        if state.timeline == GpuTimeline::Immediate {
            state.completed = value;
        }
        Ok(())
    }

    fn completed_value(&self, _fence: &Self::Fence) -> u64 {
        self.state.borrow().completed
    }

    fn set_event_on_completion(
        &self,
        _fence: &Self::Fence,
        value: u64,
        _event: &Self::Event,
    ) -> eyre::Result<()> {
        self.record(GpuCall::SetEventOnCompletion { value });
        self.state.borrow_mut().armed = Some(value);
        Ok(())
    }

    fn wait_event(
        &self,
        _event: &Self::Event,
        timeout: Option<Duration>,
    ) -> eyre::Result<WaitOutcome> {
        self.record(GpuCall::WaitEvent);
        {
            let mut state = self.state.borrow_mut();
            let reachable = state
                .armed
                .is_some_and(|armed| armed <= state.last_signaled);
            if state.timeline != GpuTimeline::Hung && reachable {
                state.completed = state.last_signaled;
                state.armed = None;
                return Ok(WaitOutcome::Signaled);
            }
        }
        // Nothing will ever fire, so a wait without timeout is cut short.
        std::thread::sleep(timeout.unwrap_or(Duration::from_millis(1)));
        Ok(WaitOutcome::TimedOut)
    }

    fn release_fence(&self, _fence: Self::Fence) {
        self.record(GpuCall::ReleaseFence);
        self.state.borrow_mut().fence_releases += 1;
    }

    fn close_event(&self, _event: Self::Event) {
        self.record(GpuCall::CloseEvent);
        self.state.borrow_mut().events_closed += 1;
    }
}

impl TextureLoader for RecordingDevice {
    fn load_texture(&mut self, path: &Path) -> eyre::Result<TextureKey> {
        self.record(GpuCall::LoadTexture {
            path: path.to_path_buf(),
        });
        let size = image::image_dimensions(path)
            .wrap_err_with(|| format!("reading image header of {}", path.display()))?;
        let mut state = self.state.borrow_mut();
        state.textures.push(size);
        Ok(TextureKey::new(state.textures.len() as u32 - 1))
    }

    fn texture_size(&self, key: TextureKey) -> Option<(u32, u32)> {
        self.state.borrow().textures.get(key.index()).copied()
    }
}

impl GraphicsDevice for RecordingDevice {
    type Surface = HeadlessSurface;
    type SwapChain = RecordedSwapChain;
    type RenderTarget = RecordedBuffer;
    type DescriptorHeap = RecordedHeap;

    fn create_device(&mut self) -> eyre::Result<()> {
        self.create_step(InitStage::Device, GpuCall::CreateDevice)
    }

    fn create_command_queue(&mut self) -> eyre::Result<()> {
        self.create_step(InitStage::CommandQueue, GpuCall::CreateCommandQueue)
    }

    fn create_swap_chain(
        &mut self,
        _surface: &HeadlessSurface,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> eyre::Result<Self::SwapChain> {
        self.create_step(
            InitStage::SwapChain,
            GpuCall::CreateSwapChain {
                width,
                height,
                buffer_count,
            },
        )?;
        let mut state = self.state.borrow_mut();
        state.buffer_count = buffer_count;
        state.back_buffer_index = 0;
        Ok(RecordedSwapChain { buffer_count })
    }

    fn create_root_signature(&mut self) -> eyre::Result<()> {
        self.create_step(InitStage::RootSignature, GpuCall::CreateRootSignature)
    }

    fn create_pipeline_state(&mut self) -> eyre::Result<()> {
        self.create_step(InitStage::PipelineState, GpuCall::CreatePipelineState)
    }

    fn create_command_allocator(&mut self) -> eyre::Result<()> {
        self.create_step(InitStage::CommandAllocator, GpuCall::CreateCommandAllocator)
    }

    fn create_command_list(&mut self) -> eyre::Result<()> {
        self.create_step(InitStage::CommandList, GpuCall::CreateCommandList)?;
        self.state.borrow_mut().list_open = false;
        Ok(())
    }

    fn create_rtv_heap(&mut self, descriptor_count: u32) -> eyre::Result<Self::DescriptorHeap> {
        self.create_step(InitStage::RtvHeap, GpuCall::CreateRtvHeap { descriptor_count })?;
        Ok(RecordedHeap {
            start: CpuDescriptorHandle {
                ptr: RTV_HEAP_START,
            },
        })
    }

    fn rtv_descriptor_size(&self) -> u32 {
        RTV_DESCRIPTOR_SIZE
    }

    fn rtv_heap_start(&self, heap: &Self::DescriptorHeap) -> CpuDescriptorHandle {
        heap.start
    }

    fn back_buffer(
        &self,
        swap_chain: &Self::SwapChain,
        index: u32,
    ) -> eyre::Result<Self::RenderTarget> {
        if self.state.borrow().fail_at == Some(InitStage::RenderTargetViews) {
            return Err(eyre!("injected back buffer {index} failure"));
        }
        if index >= swap_chain.buffer_count {
            return Err(eyre!(
                "back buffer {index} out of range for {} buffers",
                swap_chain.buffer_count
            ));
        }
        Ok(RecordedBuffer { index })
    }

    fn create_render_target_view(&self, target: &Self::RenderTarget, handle: CpuDescriptorHandle) {
        self.record(GpuCall::CreateRenderTargetView {
            buffer: target.index,
            handle,
        });
    }

    fn current_back_buffer_index(&self, _swap_chain: &Self::SwapChain) -> u32 {
        self.state.borrow().back_buffer_index
    }

    fn reset_command_allocator(&self) -> eyre::Result<()> {
        self.record(GpuCall::ResetCommandAllocator);
        let state = self.state.borrow();
        if state.list_open {
            return Err(eyre!("command allocator reset while its list is recording"));
        }
        if state.work_in_flight() {
            return Err(eyre!(
                "command allocator reset while the GPU is still executing its commands"
            ));
        }
        Ok(())
    }

    fn reset_command_list(&self) -> eyre::Result<()> {
        self.record(GpuCall::ResetCommandList);
        let mut state = self.state.borrow_mut();
        if state.list_open {
            return Err(eyre!("command list reset while still recording"));
        }
        state.list_open = true;
        Ok(())
    }

    fn resource_barrier(
        &self,
        target: &Self::RenderTarget,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.record(GpuCall::ResourceBarrier {
            buffer: target.index,
            before,
            after,
        });
    }

    fn set_viewport(&self, _viewport: &Viewport, _scissor_rect: &ScissorRect) {
        self.record(GpuCall::SetViewport);
    }

    fn set_render_target(&self, handle: CpuDescriptorHandle) {
        self.record(GpuCall::SetRenderTarget(handle));
    }

    fn clear_render_target(&self, handle: CpuDescriptorHandle, color: [f32; 4]) {
        self.record(GpuCall::ClearRenderTarget { handle, color });
    }

    fn draw_colored(&self, vertices: &[ColorVertex]) -> eyre::Result<()> {
        self.record_command(GpuCall::DrawColored {
            vertex_count: vertices.len(),
        })
    }

    fn draw_textured(&self, texture: TextureKey, vertices: &[TexturedVertex]) -> eyre::Result<()> {
        if self.texture_size(texture).is_none() {
            return Err(eyre!("texture {texture:?} was never loaded"));
        }
        self.record_command(GpuCall::DrawTextured {
            texture,
            vertex_count: vertices.len(),
        })
    }

    fn close_command_list(&self) -> eyre::Result<()> {
        self.record(GpuCall::CloseCommandList);
        let mut state = self.state.borrow_mut();
        if !state.list_open {
            return Err(eyre!("command list closed twice"));
        }
        state.list_open = false;
        Ok(())
    }

    fn execute_command_list(&self) -> eyre::Result<()> {
        self.record(GpuCall::ExecuteCommandList);
        let mut state = self.state.borrow_mut();
        if state.list_open {
            return Err(eyre!("command list executed while still recording"));
        }
        state.unfenced_work = true;
        Ok(())
    }

    fn present(&self, _swap_chain: &Self::SwapChain, sync_interval: u32) -> eyre::Result<()> {
        self.record(GpuCall::Present { sync_interval });
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.fail_next_present) {
            return Err(eyre!("injected present failure"));
        }
        state.back_buffer_index = (state.back_buffer_index + 1) % state.buffer_count.max(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_allocator_reset_with_unfenced_work() {
        let mut device = RecordingDevice::default();
        device.create_command_list().unwrap();
        device.reset_command_list().unwrap();
        device.close_command_list().unwrap();
        device.execute_command_list().unwrap();

        assert!(device.reset_command_allocator().is_err());
    }

    #[test]
    fn deferred_timeline_completes_on_wait() {
        let device = RecordingDevice::default();
        let probe = device.probe();
        let fence = device.create_fence(0).unwrap();
        let event = device.create_event().unwrap();

        device.signal(&fence, 1).unwrap();
        assert_eq!(device.completed_value(&fence), 0);

        device.set_event_on_completion(&fence, 1, &event).unwrap();
        let outcome = device
            .wait_event(&event, Some(Duration::from_millis(5)))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Signaled);
        assert_eq!(probe.completed_value(), 1);
    }

    #[test]
    fn unreachable_event_times_out() {
        let device = RecordingDevice::default();
        let fence = device.create_fence(0).unwrap();
        let event = device.create_event().unwrap();

        device.set_event_on_completion(&fence, 3, &event).unwrap();
        let outcome = device
            .wait_event(&event, Some(Duration::from_millis(1)))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
