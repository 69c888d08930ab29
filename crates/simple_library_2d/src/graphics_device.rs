use crate::fence_context::FenceContext;
use crate::texture_loader::TextureKey;
use crate::texture_loader::TextureLoader;

/// Number of swap chain buffers. Front and back buffer, so at least 2.
pub const FRAME_COUNT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Present,
    RenderTarget,
}

/// CPU address of a descriptor inside a descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn offset(self, index: u32, descriptor_size: u32) -> Self {
        Self {
            ptr: self.ptr + (index * descriptor_size) as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            top_left_x: 0.0,
            top_left_y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexturedVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Everything the frame controller needs from the GPU API.
///
/// The device owns the command queue, command allocator, command list and
/// pipeline objects; the controller only ever borrows them through these
/// methods. The swap chain, render targets and RTV heap are handed to the
/// controller, which owns them.
pub trait GraphicsDevice: FenceContext + TextureLoader {
    /// Native window surface the swap chain presents to.
    type Surface: ?Sized;
    type SwapChain;
    type RenderTarget;
    type DescriptorHeap;

    fn create_device(&mut self) -> eyre::Result<()>;
    fn create_command_queue(&mut self) -> eyre::Result<()>;
    fn create_swap_chain(
        &mut self,
        surface: &Self::Surface,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> eyre::Result<Self::SwapChain>;
    fn create_root_signature(&mut self) -> eyre::Result<()>;
    fn create_pipeline_state(&mut self) -> eyre::Result<()>;
    fn create_command_allocator(&mut self) -> eyre::Result<()>;
    /// Creates the command list in the closed state.
    fn create_command_list(&mut self) -> eyre::Result<()>;
    fn create_rtv_heap(&mut self, descriptor_count: u32) -> eyre::Result<Self::DescriptorHeap>;
    fn rtv_descriptor_size(&self) -> u32;
    fn rtv_heap_start(&self, heap: &Self::DescriptorHeap) -> CpuDescriptorHandle;
    fn back_buffer(&self, swap_chain: &Self::SwapChain, index: u32)
        -> eyre::Result<Self::RenderTarget>;
    fn create_render_target_view(&self, target: &Self::RenderTarget, handle: CpuDescriptorHandle);
    fn current_back_buffer_index(&self, swap_chain: &Self::SwapChain) -> u32;

    /// Must only be called once the GPU has finished the work recorded with the allocator.
    fn reset_command_allocator(&self) -> eyre::Result<()>;
    /// Reopens the command list for recording with the default pipeline state bound.
    fn reset_command_list(&self) -> eyre::Result<()>;
    fn resource_barrier(
        &self,
        target: &Self::RenderTarget,
        before: ResourceState,
        after: ResourceState,
    );
    fn set_viewport(&self, viewport: &Viewport, scissor_rect: &ScissorRect);
    fn set_render_target(&self, handle: CpuDescriptorHandle);
    fn clear_render_target(&self, handle: CpuDescriptorHandle, color: [f32; 4]);
    /// Records a triangle list.
    fn draw_colored(&self, vertices: &[ColorVertex]) -> eyre::Result<()>;
    /// Records a triangle list sampling `texture`.
    fn draw_textured(&self, texture: TextureKey, vertices: &[TexturedVertex]) -> eyre::Result<()>;
    fn close_command_list(&self) -> eyre::Result<()>;
    fn execute_command_list(&self) -> eyre::Result<()>;
    fn present(&self, swap_chain: &Self::SwapChain, sync_interval: u32) -> eyre::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_offsets_are_stride_multiples() {
        let start = CpuDescriptorHandle { ptr: 0x1000 };
        assert_eq!(start.offset(0, 32), start);
        assert_eq!(start.offset(1, 32).ptr, 0x1020);
    }
}
